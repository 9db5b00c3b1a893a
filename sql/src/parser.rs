//! A hand-rolled recursive-descent parser built from `nom` combinators.
//!
//! Keywords are matched case-insensitively and must not be immediately
//! followed by another identifier character (so `INT` doesn't swallow the
//! front of `INTO`). Identifiers are case-sensitive and compared verbatim
//! by every later layer.

use nom::branch::alt;
use nom::bytes::complete::{tag, tag_no_case, take_while, take_while1};
use nom::character::complete::{char, digit1, multispace0};
use nom::combinator::{cut, map, opt, peek, recognize, value};
use nom::multi::separated_list1;
use nom::sequence::{delimited, pair, preceded, tuple};
use nom::IResult;

use common::error::Error;
use common::value::DataType;
use common::CResult;

use crate::ast::*;

type Res<'a, O> = IResult<&'a str, O>;

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn ws<'a, O, F>(mut inner: F) -> impl FnMut(&'a str) -> Res<'a, O>
where
    F: FnMut(&'a str) -> Res<'a, O>,
{
    move |input| {
        let (input, _) = multispace0(input)?;
        inner(input)
    }
}

/// A bare keyword that must not be followed by another ident character,
/// so `"INT"` doesn't accidentally match the start of `"INTO"`.
fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> Res<'a, &'a str> {
    move |input| {
        let (rest, matched) = ws(tag_no_case(kw))(input)?;
        peek(|i: &'a str| -> Res<'a, ()> {
            match i.chars().next() {
                Some(c) if is_ident_continue(c) => {
                    Err(nom::Err::Error(nom::error::Error::new(i, nom::error::ErrorKind::Tag)))
                }
                _ => Ok((i, ())),
            }
        })(rest)?;
        Ok((rest, matched))
    }
}

fn identifier(input: &str) -> Res<&str> {
    ws(recognize(pair(take_while1(is_ident_start), take_while(is_ident_continue))))(input)
}

fn ident_owned(input: &str) -> Res<String> {
    map(identifier, |s: &str| s.to_string())(input)
}

fn table_ref(input: &str) -> Res<TableRef> {
    map(pair(ident_owned, opt(preceded(ws(char('.')), ident_owned))), |(a, b)| match b {
        Some(table) => TableRef { database: Some(a), table },
        None => TableRef { database: None, table: a },
    })(input)
}

fn quoted_string(input: &str) -> Res<String> {
    ws(alt((
        delimited(char('\''), take_while(|c| c != '\''), char('\'')),
        delimited(char('"'), take_while(|c| c != '"'), char('"')),
    )))(input)
    .map(|(rest, s)| (rest, s.to_string()))
}

fn number_literal(input: &str) -> Res<Literal> {
    ws(recognize(tuple((
        opt(char('-')),
        digit1,
        opt(preceded(char('.'), digit1)),
        opt(tuple((alt((char('e'), char('E'))), opt(alt((char('+'), char('-')))), digit1))),
    ))))(input)
    .map(|(rest, text)| {
        let is_float = text.contains('.') || text.contains('e') || text.contains('E');
        let lit = if is_float {
            Literal::Float(text.parse().unwrap())
        } else {
            Literal::Integer(text.parse().unwrap())
        };
        (rest, lit)
    })
}

fn boolean_literal(input: &str) -> Res<Literal> {
    alt((
        value(Literal::Boolean(true), keyword("TRUE")),
        value(Literal::Boolean(false), keyword("FALSE")),
    ))(input)
}

fn placeholder_literal(input: &str) -> Res<Literal> {
    value(Literal::Placeholder, ws(char('?')))(input)
}

fn literal(input: &str) -> Res<Literal> {
    alt((
        boolean_literal,
        placeholder_literal,
        number_literal,
        map(quoted_string, Literal::Text),
    ))(input)
}

fn compare_op(input: &str) -> Res<CompareOp> {
    ws(alt((
        value(CompareOp::Le, tag("<=")),
        value(CompareOp::Ge, tag(">=")),
        value(CompareOp::Eq, tag("=")),
        value(CompareOp::Lt, tag("<")),
        value(CompareOp::Gt, tag(">")),
    )))(input)
}

fn condition(input: &str) -> Res<Condition> {
    map(tuple((ident_owned, compare_op, literal)), |(column, op, value)| Condition {
        column,
        op,
        value,
    })(input)
}

fn where_clause(input: &str) -> Res<Vec<Condition>> {
    preceded(keyword("WHERE"), cut(separated_list1(keyword("AND"), condition)))(input)
}

fn data_type(input: &str) -> Res<DataType> {
    alt((
        value(DataType::TinyInt, keyword("TINYINT")),
        value(DataType::SmallInt, keyword("SMALLINT")),
        value(DataType::BigInt, keyword("BIGINT")),
        value(DataType::Int, keyword("INT")),
        value(DataType::Double, keyword("DOUBLE")),
        value(DataType::Float, keyword("FLOAT")),
        value(DataType::Timestamp, keyword("TIMESTAMP")),
        value(DataType::Boolean, keyword("BOOLEAN")),
        value(DataType::Text, keyword("TEXT")),
    ))(input)
}

#[derive(Debug, Clone)]
enum ColSpec {
    Column(ColumnDef),
    PrimaryKey(Vec<String>),
}

fn column_def_spec(input: &str) -> Res<ColSpec> {
    map(pair(ident_owned, data_type), |(name, type_name)| {
        ColSpec::Column(ColumnDef { name, type_name })
    })(input)
}

fn primary_key_spec(input: &str) -> Res<ColSpec> {
    map(
        preceded(
            pair(keyword("PRIMARY"), keyword("KEY")),
            cut(delimited(ws(char('(')), separated_list1(ws(char(',')), ident_owned), ws(char(')')))),
        ),
        ColSpec::PrimaryKey,
    )(input)
}

fn col_spec(input: &str) -> Res<ColSpec> {
    alt((primary_key_spec, column_def_spec))(input)
}

fn func_name(input: &str) -> Res<FuncName> {
    alt((
        value(FuncName::AdjPx, keyword("ADJ_PX")),
        value(FuncName::AdjVol, keyword("ADJ_VOL")),
        value(FuncName::Adj, keyword("ADJ")),
    ))(input)
}

fn projected_column(input: &str) -> Res<ProjectedColumn> {
    alt((
        map(
            tuple((
                func_name,
                ws(char('(')),
                ident_owned,
                opt(preceded(ws(char(',')), boolean_literal)),
                ws(char(')')),
            )),
            |(name, _, column, backward_lit, _)| {
                let backward = backward_lit.map(|l| matches!(l, Literal::Boolean(true)));
                ProjectedColumn {
                    column,
                    func: Some(FuncCall { name, backward }),
                }
            },
        ),
        map(ident_owned, |column| ProjectedColumn { column, func: None }),
    ))(input)
}

fn projection(input: &str) -> Res<Projection> {
    alt((
        value(Projection::All, ws(char('*'))),
        map(separated_list1(ws(char(',')), projected_column), Projection::Columns),
    ))(input)
}

fn limit_clause(input: &str) -> Res<i64> {
    preceded(
        keyword("LIMIT"),
        cut(ws(map(recognize(pair(opt(char('-')), digit1)), |s: &str| s.parse().unwrap()))),
    )(input)
}

fn select_stmt(input: &str) -> Res<SelectStmt> {
    map(
        tuple((
            projection,
            preceded(keyword("FROM"), cut(table_ref)),
            opt(where_clause),
            opt(limit_clause),
        )),
        |(projection, table, where_clause, limit)| SelectStmt {
            projection,
            table,
            where_clause: where_clause.unwrap_or_default(),
            limit,
        },
    )(input)
}

fn insert_stmt(input: &str) -> Res<InsertStmt> {
    map(
        preceded(
            keyword("INTO"),
            cut(tuple((
                table_ref,
                delimited(ws(char('(')), separated_list1(ws(char(',')), ident_owned), ws(char(')'))),
                preceded(
                    keyword("VALUES"),
                    delimited(ws(char('(')), separated_list1(ws(char(',')), literal), ws(char(')'))),
                ),
            ))),
        ),
        |(table, columns, values)| InsertStmt { table, columns, values },
    )(input)
}

fn create_table_stmt(input: &str) -> Res<CreateTableStmt> {
    map(
        preceded(
            keyword("TABLE"),
            cut(tuple((
                opt(pair(keyword("IF"), pair(keyword("NOT"), keyword("EXISTS")))),
                table_ref,
                delimited(ws(char('(')), separated_list1(ws(char(',')), col_spec), ws(char(')'))),
            ))),
        ),
        |(if_not_exists, table, specs)| {
            let mut columns = Vec::new();
            let mut primary_key = Vec::new();
            for spec in specs {
                match spec {
                    ColSpec::Column(c) => columns.push(c),
                    ColSpec::PrimaryKey(keys) => primary_key = keys,
                }
            }
            CreateTableStmt {
                table,
                if_not_exists: if_not_exists.is_some(),
                columns,
                primary_key,
            }
        },
    )(input)
}

fn create_stmt(input: &str) -> Res<Stmt> {
    preceded(
        keyword("CREATE"),
        cut(alt((
            map(create_table_stmt, Stmt::CreateTable),
            map(
                preceded(
                    keyword("DATABASE"),
                    cut(pair(opt(pair(keyword("IF"), pair(keyword("NOT"), keyword("EXISTS")))), ident_owned)),
                ),
                |(if_not_exists, name)| Stmt::CreateDatabase {
                    name,
                    if_not_exists: if_not_exists.is_some(),
                },
            ),
        ))),
    )(input)
}

fn drop_stmt(input: &str) -> Res<Stmt> {
    preceded(
        keyword("DROP"),
        cut(alt((
            map(preceded(keyword("TABLE"), table_ref), |table| Stmt::DropTable { table }),
            map(preceded(keyword("DATABASE"), ident_owned), |name| Stmt::DropDatabase { name }),
        ))),
    )(input)
}

fn delete_stmt(input: &str) -> Res<DeleteStmt> {
    map(
        preceded(keyword("FROM"), cut(pair(table_ref, opt(where_clause)))),
        |(table, where_clause)| DeleteStmt {
            table,
            where_clause: where_clause.unwrap_or_default(),
        },
    )(input)
}

fn alter_stmt(input: &str) -> Res<Stmt> {
    map(
        preceded(
            pair(keyword("ALTER"), keyword("TABLE")),
            cut(tuple((
                table_ref,
                preceded(keyword("RENAME"), cut(ident_owned)),
                preceded(keyword("TO"), cut(ident_owned)),
            ))),
        ),
        |(table, from, to)| Stmt::AlterTableRenameColumn { table, from, to },
    )(input)
}

fn statement(input: &str) -> Res<Stmt> {
    alt((
        map(preceded(keyword("SELECT"), cut(select_stmt)), Stmt::Select),
        map(preceded(keyword("INSERT"), cut(insert_stmt)), Stmt::Insert),
        create_stmt,
        drop_stmt,
        map(preceded(keyword("DELETE"), cut(delete_stmt)), Stmt::Delete),
        alter_stmt,
    ))(input)
}

/// Parse a complete SQL statement, failing with `Error::Parse` naming the
/// byte offset of the first token the grammar couldn't account for.
pub fn parse(sql: &str) -> CResult<Stmt> {
    let (rest, stmt) = statement(sql).map_err(|e| to_parse_error(sql, e))?;
    let (rest, _) = multispace0::<_, nom::error::Error<&str>>(rest).unwrap();
    let rest = rest.trim_end_matches(';').trim_start();
    if !rest.is_empty() {
        return Err(Error::Parse {
            message: format!("unexpected trailing input: {rest:?}"),
            position: sql.len() - rest.len(),
        });
    }
    Ok(stmt)
}

fn to_parse_error(original: &str, err: nom::Err<nom::error::Error<&str>>) -> Error {
    match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => Error::Parse {
            message: format!("unexpected input near {:?}", e.input.get(..20.min(e.input.len())).unwrap_or(e.input)),
            position: original.len() - e.input.len(),
        },
        nom::Err::Incomplete(_) => Error::Parse {
            message: "incomplete statement".to_string(),
            position: original.len(),
        },
    }
}
