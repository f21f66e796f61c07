use chrono::NaiveDate;
use sqlparser::ast::{self, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::calendar::{self, InvalidDate};
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    SelectCities,
    SelectVenues {
        city_id: Option<CityId>,
        favourites_only: bool,
        date: Option<NaiveDate>,
        page: Option<u32>,
        limit: Option<u32>,
    },
    SelectVenue {
        id: VenueId,
    },
    SelectPackage {
        id: PackageId,
    },
    SelectNearby,
    Login {
        email: String,
        password: String,
    },
    InsertUser {
        email: String,
        fullname: String,
        password: String,
    },
    InsertOrder {
        package_id: PackageId,
        date: NaiveDate,
        access_token: String,
    },
    InsertCity(City),
    InsertVenue(Venue),
    InsertCategory(PackageCategory),
    InsertPackage(Package),
    InsertGalleryImage(GalleryImage),
}

/// Column layout of the rows a statement returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Cities,
    Venues,
    VenueDetail,
    PackageDetail,
    Nearby,
    Session,
    OrderReceipt,
}

impl Command {
    /// `None` for statements that answer with a command tag only.
    pub fn shape(&self) -> Option<Shape> {
        match self {
            Command::SelectCities => Some(Shape::Cities),
            Command::SelectVenues { .. } => Some(Shape::Venues),
            Command::SelectVenue { .. } => Some(Shape::VenueDetail),
            Command::SelectPackage { .. } => Some(Shape::PackageDetail),
            Command::SelectNearby => Some(Shape::Nearby),
            Command::Login { .. } => Some(Shape::Session),
            Command::InsertOrder { .. } => Some(Shape::OrderReceipt),
            Command::InsertUser { .. }
            | Command::InsertCity(_)
            | Command::InsertVenue(_)
            | Command::InsertCategory(_)
            | Command::InsertPackage(_)
            | Command::InsertGalleryImage(_) => None,
        }
    }
}

const USER_COLUMNS: &[&str] = &["email", "fullname", "password"];
const ORDER_COLUMNS: &[&str] = &["package_id", "date", "access_token"];
const CITY_COLUMNS: &[&str] = &["id", "name"];
const VENUE_COLUMNS: &[&str] = &[
    "id",
    "city_id",
    "name",
    "min_price",
    "max_price",
    "capacity",
    "star",
    "review_count",
    "thumbnail_url",
    "description",
    "website",
    "phone",
    "email",
    "instagram",
    "address",
    "logo",
    "is_favourite",
];
const CATEGORY_COLUMNS: &[&str] = &["id", "venue_id", "description"];
const PACKAGE_COLUMNS: &[&str] = &[
    "id",
    "category_id",
    "name",
    "thumbnail_url",
    "price",
    "capacity",
    "description",
];
const GALLERY_COLUMNS: &[&str] = &["id", "venue_id", "file_url"];

const VENUE_FILTERS: &[&str] = &["id", "city_id", "is_favourite", "date", "page", "limit"];

fn parse_statement(sql: &str) -> Result<Statement, SqlError> {
    let dialect = PostgreSqlDialect {};
    let mut stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    match stmts.len() {
        0 => Err(SqlError::Empty),
        1 => Ok(stmts.remove(0)),
        n => Err(SqlError::Unsupported(format!("{n} statements in one query"))),
    }
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    match parse_statement(sql)? {
        Statement::Insert(insert) => parse_insert(&insert),
        Statement::Query(query) => parse_select(&query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Result layout of `sql` without binding its parameters. Used to describe
/// prepared statements, where `$n` placeholders are still unresolved.
pub fn result_shape(sql: &str) -> Option<Shape> {
    match parse_statement(sql).ok()? {
        Statement::Insert(insert) => {
            (insert_table_name(&insert).ok()? == "orders").then_some(Shape::OrderReceipt)
        }
        Statement::Query(query) => {
            let SetExpr::Select(select) = query.body.as_ref() else {
                return None;
            };
            let table = table_factor_name(&select.from.first()?.relation).ok()?;
            match table.as_str() {
                "cities" => Some(Shape::Cities),
                "nearby" => Some(Shape::Nearby),
                "packages" => Some(Shape::PackageDetail),
                "login" => Some(Shape::Session),
                "venues" => {
                    let mut filters = Vec::new();
                    if let Some(selection) = &select.selection {
                        collect_eq_filters(selection, &mut filters).ok()?;
                    }
                    if filters.iter().any(|(col, _)| col == "id") {
                        Some(Shape::VenueDetail)
                    } else {
                        Some(Shape::Venues)
                    }
                }
                _ => None,
            }
        }
        _ => None,
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters)?;
    }
    let filter = |col: &str| filters.iter().find(|(c, _)| c == col).map(|(_, e)| *e);

    match table.as_str() {
        "cities" => {
            reject_filters("cities", &filters, &[])?;
            Ok(Command::SelectCities)
        }
        "nearby" => {
            reject_filters("nearby", &filters, &[])?;
            Ok(Command::SelectNearby)
        }
        "venues" => {
            reject_filters("venues", &filters, VENUE_FILTERS)?;
            if let Some(id) = filter("id") {
                return Ok(Command::SelectVenue {
                    id: parse_i64_expr(id)?,
                });
            }
            Ok(Command::SelectVenues {
                city_id: filter("city_id").map(parse_i64_expr).transpose()?,
                favourites_only: filter("is_favourite")
                    .map(parse_bool)
                    .transpose()?
                    .unwrap_or(false),
                date: filter("date").map(parse_date_expr).transpose()?,
                page: filter("page").map(parse_u32).transpose()?,
                limit: filter("limit").map(parse_u32).transpose()?,
            })
        }
        "packages" => {
            reject_filters("packages", &filters, &["id"])?;
            let id = filter("id").ok_or(SqlError::MissingFilter("id"))?;
            Ok(Command::SelectPackage {
                id: parse_i64_expr(id)?,
            })
        }
        "login" => {
            reject_filters("login", &filters, &["email", "password"])?;
            Ok(Command::Login {
                email: parse_string(filter("email").ok_or(SqlError::MissingFilter("email"))?)?,
                password: parse_string(
                    filter("password").ok_or(SqlError::MissingFilter("password"))?,
                )?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Flatten `a = x AND b = y AND ...` into `(column, value)` pairs.
fn collect_eq_filters<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_eq_filters(left, out)?;
                collect_eq_filters(right, out)
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                out.push((col, right.as_ref()));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("operator {other} in WHERE"))),
        },
        other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
    }
}

fn reject_filters(
    table: &'static str,
    filters: &[(String, &Expr)],
    allowed: &[&str],
) -> Result<(), SqlError> {
    match filters.iter().find(|(col, _)| !allowed.contains(&col.as_str())) {
        Some((col, _)) => Err(SqlError::UnknownColumn {
            table,
            column: col.clone(),
        }),
        None => Ok(()),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row keyed by column name.
struct Row<'a> {
    table: &'static str,
    cells: Vec<(String, &'a Expr)>,
}

impl<'a> Row<'a> {
    /// Explicit column lists may name columns in any order and omit
    /// optional ones; without a list, values fill `layout` positionally.
    fn new(insert: &'a ast::Insert, table: &'static str, layout: &[&str]) -> Result<Self, SqlError> {
        let values = single_values_row(insert)?;
        let names: Vec<String> = if insert.columns.is_empty() {
            if values.len() > layout.len() {
                return Err(SqlError::WrongArity(table, layout.len(), values.len()));
            }
            layout.iter().map(|c| c.to_string()).collect()
        } else {
            if insert.columns.len() != values.len() {
                return Err(SqlError::WrongArity(table, insert.columns.len(), values.len()));
            }
            insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
        };
        if let Some(unknown) = names.iter().find(|n| !layout.contains(&n.as_str())) {
            return Err(SqlError::UnknownColumn {
                table,
                column: unknown.clone(),
            });
        }
        Ok(Self {
            table,
            cells: names.into_iter().zip(values.iter()).collect(),
        })
    }

    fn get(&self, column: &str) -> Option<&'a Expr> {
        self.cells.iter().find(|(c, _)| c == column).map(|(_, e)| *e)
    }

    fn required(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(column)
            .ok_or(SqlError::MissingColumn(self.table, column))
    }

    fn string(&self, column: &'static str) -> Result<String, SqlError> {
        parse_string(self.required(column)?)
    }

    fn string_or_empty(&self, column: &str) -> Result<String, SqlError> {
        self.get(column).map(parse_string_or_null).transpose().map(Option::unwrap_or_default)
    }

    fn i64(&self, column: &'static str) -> Result<i64, SqlError> {
        parse_i64_expr(self.required(column)?)
    }

    fn u32_or_zero(&self, column: &str) -> Result<u32, SqlError> {
        self.get(column).map(parse_u32).transpose().map(|v| v.unwrap_or(0))
    }

    fn f64_or_zero(&self, column: &str) -> Result<f64, SqlError> {
        self.get(column).map(parse_f64).transpose().map(|v| v.unwrap_or(0.0))
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    match table.as_str() {
        "users" => {
            let row = Row::new(insert, "users", USER_COLUMNS)?;
            Ok(Command::InsertUser {
                email: row.string("email")?,
                fullname: row.string("fullname")?,
                password: row.string("password")?,
            })
        }
        "orders" => {
            let row = Row::new(insert, "orders", ORDER_COLUMNS)?;
            Ok(Command::InsertOrder {
                package_id: row.i64("package_id")?,
                date: parse_date_expr(row.required("date")?)?,
                access_token: row.string("access_token")?,
            })
        }
        "cities" => {
            let row = Row::new(insert, "cities", CITY_COLUMNS)?;
            Ok(Command::InsertCity(City {
                id: row.i64("id")?,
                name: row.string("name")?,
            }))
        }
        "venues" => {
            let row = Row::new(insert, "venues", VENUE_COLUMNS)?;
            Ok(Command::InsertVenue(Venue {
                id: row.i64("id")?,
                city_id: row.i64("city_id")?,
                name: row.string("name")?,
                min_price: row.f64_or_zero("min_price")?,
                max_price: row.f64_or_zero("max_price")?,
                capacity: row.u32_or_zero("capacity")?,
                star: row.f64_or_zero("star")?,
                review_count: row.u32_or_zero("review_count")?,
                thumbnail_url: row.string_or_empty("thumbnail_url")?,
                description: row.string_or_empty("description")?,
                website: row.string_or_empty("website")?,
                phone: row.string_or_empty("phone")?,
                email: row.string_or_empty("email")?,
                instagram: row.string_or_empty("instagram")?,
                address: row.string_or_empty("address")?,
                logo: row.string_or_empty("logo")?,
                is_favourite: row
                    .get("is_favourite")
                    .map(parse_bool)
                    .transpose()?
                    .unwrap_or(false),
            }))
        }
        "categories" => {
            let row = Row::new(insert, "categories", CATEGORY_COLUMNS)?;
            Ok(Command::InsertCategory(PackageCategory {
                id: row.i64("id")?,
                venue_id: row.i64("venue_id")?,
                description: row.string("description")?,
            }))
        }
        "packages" => {
            let row = Row::new(insert, "packages", PACKAGE_COLUMNS)?;
            Ok(Command::InsertPackage(Package {
                id: row.i64("id")?,
                category_id: row.i64("category_id")?,
                name: row.string("name")?,
                thumbnail_url: row.string_or_empty("thumbnail_url")?,
                price: row.f64_or_zero("price")?,
                capacity: row.u32_or_zero("capacity")?,
                description: row.string_or_empty("description")?,
            }))
        }
        "galleries" => {
            let row = Row::new(insert, "galleries", GALLERY_COLUMNS)?;
            Ok(Command::InsertGalleryImage(GalleryImage {
                id: row.i64("id")?,
                venue_id: row.i64("venue_id")?,
                file_url: row.string("file_url")?,
            }))
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn single_values_row(insert: &ast::Insert) -> Result<&Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row),
            rows => Err(SqlError::Unsupported(format!("{}-row INSERT", rows.len()))),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected integer, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

fn parse_f64(expr: &Expr) -> Result<f64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad number {s:?}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_f64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(String::new()),
        _ => parse_string(expr),
    }
}

/// A `'YYYY-MM-DD'` literal.
fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    Ok(calendar::parse_date(&parse_string(expr)?)?)
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("unknown column {column} for {table}")]
    UnknownColumn { table: &'static str, column: String },
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error("{0}: missing column {1}")]
    MissingColumn(&'static str, &'static str),
    #[error(transparent)]
    InvalidDate(#[from] InvalidDate),
}
