//! Process-wide collaborators a connection's dispatcher reaches for: the
//! KV-backed engine, the global user map, and the optional response
//! cache (§5 "shared state").

use auth::UserStore;
use common::CResult;
use executor::Engine;
use kv::Store;

use crate::cache::ResponseCache;

pub struct Shared<S: Store> {
    pub store: S,
    pub engine: Engine,
    pub users: UserStore,
    pub cache: Option<ResponseCache>,
    pub max_concurrency: usize,
}

impl<S: Store> Shared<S> {
    /// Bootstrap `_meta_.user` and load the user map (§4.6 "loaded at
    /// startup"), then wrap everything a connection needs behind one
    /// shared handle.
    pub fn new(store: S, cache_ttl_secs: Option<u64>, max_concurrency: usize) -> CResult<Self> {
        auth::bootstrap(&store)?;
        let users = UserStore::new();
        users.load_users(&store)?;
        Ok(Shared {
            store,
            engine: Engine::new(),
            users,
            cache: cache_ttl_secs.map(ResponseCache::new),
            max_concurrency,
        })
    }
}
