//! The parse tree (§4.1): a tagged sum over statement kinds with no
//! semantic interpretation. Column existence, type checking, and
//! WHERE-to-range planning all happen one layer up, in `resolver`.

use common::value::DataType;

#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub database: Option<String>,
    pub table: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

/// An unevaluated SQL literal, or a positional placeholder. Placeholders
/// are numbered left to right across the whole statement by the caller
/// that walks the tree (the resolver), not by the parser itself.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
    Placeholder,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: String,
    pub op: CompareOp,
    pub value: Literal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuncName {
    Adj,
    AdjPx,
    AdjVol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuncCall {
    pub name: FuncName,
    /// The optional boolean argument: "backward" when true.
    pub backward: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedColumn {
    pub column: String,
    pub func: Option<FuncCall>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    All,
    Columns(Vec<ProjectedColumn>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStmt {
    pub projection: Projection,
    pub table: TableRef,
    pub where_clause: Vec<Condition>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStmt {
    pub table: TableRef,
    pub columns: Vec<String>,
    pub values: Vec<Literal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub type_name: DataType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableStmt {
    pub table: TableRef,
    pub if_not_exists: bool,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStmt {
    pub table: TableRef,
    pub where_clause: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Select(SelectStmt),
    Insert(InsertStmt),
    CreateDatabase { name: String, if_not_exists: bool },
    CreateTable(CreateTableStmt),
    DropDatabase { name: String },
    DropTable { table: TableRef },
    Delete(DeleteStmt),
    AlterTableRenameColumn { table: TableRef, from: String, to: String },
}
