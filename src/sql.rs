use std::collections::HashMap;

use sqlparser::ast::{
    self, Assignment, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement,
    TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
///
/// Dates and times stay as the client sent them; the engine validates them.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRestaurant(RestaurantInput),
    UpdateRestaurant {
        id: Ulid,
        changes: RestaurantChanges,
    },
    SelectRestaurants {
        id: Option<Ulid>,
    },
    SelectAvailability {
        restaurant_id: Ulid,
        date: String,
        time: String,
        exclude_id: Option<Ulid>,
    },
    InsertReservation {
        id: Ulid,
        restaurant_id: Ulid,
        date: String,
        time: String,
        tables: TableCounts,
    },
    UpdateReservation {
        id: Ulid,
        date: Option<String>,
        time: Option<String>,
        tables: Option<TablesPatch>,
    },
    MarkViewed {
        restaurant_id: Ulid,
    },
    DeleteReservation {
        id: Ulid,
    },
    SelectReservation {
        id: Ulid,
    },
    SelectRestaurantReservations {
        restaurant_id: Ulid,
        from: Option<String>,
    },
    SelectDinerReservations,
    SelectUnviewed {
        restaurant_id: Ulid,
    },
    Set {
        name: String,
        value: String,
    },
    Listen {
        restaurant_id: Ulid,
    },
    Unlisten {
        restaurant_id: Ulid,
    },
    UnlistenAll,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestaurantInput {
    pub id: Ulid,
    pub name: String,
    pub location: Option<String>,
    pub contact: Option<String>,
    pub cuisines: Vec<String>,
    pub opening: String,
    pub closing: String,
    pub capacity: TableCounts,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestaurantChanges {
    pub name: Option<String>,
    pub location: Option<String>,
    pub contact: Option<String>,
    pub cuisines: Option<Vec<String>>,
    pub opening: Option<String>,
    pub closing: Option<String>,
    pub capacity: TablesPatch,
}

impl From<RestaurantInput> for NewRestaurant {
    fn from(r: RestaurantInput) -> Self {
        NewRestaurant {
            id: r.id,
            name: r.name,
            location: r.location,
            contact: r.contact,
            cuisines: r.cuisines,
            opening: r.opening,
            closing: r.closing,
            capacity: r.capacity,
        }
    }
}

impl From<RestaurantChanges> for RestaurantPatch {
    fn from(c: RestaurantChanges) -> Self {
        RestaurantPatch {
            name: c.name,
            location: c.location,
            contact: c.contact,
            cuisines: c.cuisines,
            opening: c.opening,
            closing: c.closing,
            capacity: c.capacity,
        }
    }
}

const CHANNEL_PREFIX: &str = "restaurant_";

const RESTAURANT_COLUMNS: &[&str] = &[
    "id",
    "name",
    "opening",
    "closing",
    "two_person",
    "four_person",
    "six_person",
    "location",
    "contact",
    "cuisines",
];

const RESERVATION_COLUMNS: &[&str] = &[
    "id",
    "restaurant_id",
    "date",
    "time",
    "two_person",
    "four_person",
    "six_person",
];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if let Some(cmd) = parse_session_command(trimmed)? {
        return Ok(cmd);
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let stmt = match stmts.as_slice() {
        [] => return Err(SqlError::Empty),
        [stmt] => stmt,
        _ => return Err(SqlError::MultipleStatements(stmts.len())),
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection.as_ref()),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// LISTEN / UNLISTEN / SET are matched by prefix; their argument shapes are
/// narrower than what sqlparser models for them.
fn parse_session_command(trimmed: &str) -> Result<Option<Command>, SqlError> {
    let Some((keyword, rest)) = trimmed.split_once(char::is_whitespace) else {
        return Ok(None);
    };
    let rest = rest.trim();
    let keyword = keyword.to_ascii_uppercase();
    if matches!(keyword.as_str(), "LISTEN" | "UNLISTEN" | "SET") && rest.contains(';') {
        return Err(SqlError::MultipleStatements(rest.split(';').count()));
    }
    match keyword.as_str() {
        "LISTEN" => Ok(Some(Command::Listen {
            restaurant_id: channel_restaurant(rest)?,
        })),
        "UNLISTEN" if rest == "*" => Ok(Some(Command::UnlistenAll)),
        "UNLISTEN" => Ok(Some(Command::Unlisten {
            restaurant_id: channel_restaurant(rest)?,
        })),
        "SET" => {
            let (name, value) = rest
                .split_once('=')
                .or_else(|| split_keyword(rest, " to "))
                .ok_or_else(|| SqlError::Parse(format!("malformed SET: {trimmed}")))?;
            let name = name.trim().to_ascii_lowercase();
            let value = value.trim();
            let value = value
                .strip_prefix('\'')
                .and_then(|v| v.strip_suffix('\''))
                .map(|v| v.replace("''", "'"))
                .unwrap_or_else(|| value.to_string());
            Ok(Some(Command::Set { name, value }))
        }
        _ => Ok(None),
    }
}

fn split_keyword<'a>(s: &'a str, keyword: &str) -> Option<(&'a str, &'a str)> {
    let at = s.to_ascii_lowercase().find(keyword)?;
    Some((&s[..at], &s[at + keyword.len()..]))
}

fn channel_restaurant(channel: &str) -> Result<Ulid, SqlError> {
    let channel = channel.trim_matches('"');
    let id = channel
        .strip_prefix(CHANNEL_PREFIX)
        .ok_or_else(|| SqlError::BadChannel(channel.to_string()))?;
    Ulid::from_string(id).map_err(|_| SqlError::BadChannel(channel.to_string()))
}

/// The LISTEN channel carrying a restaurant's reservation events.
pub fn channel_name(restaurant_id: Ulid) -> String {
    format!("{CHANNEL_PREFIX}{restaurant_id}")
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let defaults = match table.as_str() {
        "restaurants" => RESTAURANT_COLUMNS,
        "reservations" => RESERVATION_COLUMNS,
        _ => return Err(SqlError::UnknownTable(table)),
    };
    let row = insert_row(insert, defaults)?;
    match table.as_str() {
        "restaurants" => {
            let mut capacity = TableCounts::ZERO;
            for size in TableSize::ALL {
                if let Some(expr) = row.get(size.column()) {
                    capacity.set(size, parse_u32(expr)?);
                }
            }
            Ok(Command::InsertRestaurant(RestaurantInput {
                id: parse_ulid(required(&row, "id")?)?,
                name: parse_text(required(&row, "name")?)?,
                location: optional_text(&row, "location")?,
                contact: optional_text(&row, "contact")?,
                cuisines: match row.get("cuisines") {
                    Some(expr) => parse_list(expr)?,
                    None => Vec::new(),
                },
                opening: parse_text(required(&row, "opening")?)?,
                closing: parse_text(required(&row, "closing")?)?,
                capacity,
            }))
        }
        _ => {
            let mut tables = TableCounts::ZERO;
            for size in TableSize::ALL {
                if let Some(expr) = row.get(size.column()) {
                    tables.set(size, parse_u32(expr)?);
                }
            }
            Ok(Command::InsertReservation {
                id: parse_ulid(required(&row, "id")?)?,
                restaurant_id: parse_ulid(required(&row, "restaurant_id")?)?,
                date: parse_text(required(&row, "date")?)?,
                time: parse_text(required(&row, "time")?)?,
                tables,
            })
        }
    }
}

/// Pair the single VALUES row with its column names. Without an explicit
/// column list, `defaults` gives the positional order.
fn insert_row<'a>(
    insert: &'a ast::Insert,
    defaults: &[&str],
) -> Result<HashMap<String, &'a Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    let rows = match body.body.as_ref() {
        SetExpr::Values(values) => &values.rows,
        _ => return Err(SqlError::Parse("expected VALUES".into())),
    };
    let [row] = rows.as_slice() else {
        return Err(SqlError::Unsupported("multi-row INSERT".into()));
    };
    let columns: Vec<String> = if insert.columns.is_empty() {
        defaults.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if row.len() > columns.len() {
        return Err(SqlError::WrongArity(columns.len(), row.len()));
    }
    Ok(columns.into_iter().zip(row.iter()).collect())
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[Assignment],
    selection: Option<&Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let mut set = HashMap::new();
    for a in assignments {
        let AssignmentTarget::ColumnName(name) = &a.target else {
            return Err(SqlError::Unsupported("tuple assignment".into()));
        };
        let col = object_name_last(name).ok_or_else(|| SqlError::Parse("empty column".into()))?;
        set.insert(col, &a.value);
    }
    let filters = collect_filters(selection)?;

    match table.as_str() {
        "restaurants" => {
            let mut changes = RestaurantChanges::default();
            for (col, expr) in set {
                match col.as_str() {
                    "name" => changes.name = Some(parse_text(expr)?),
                    "location" => changes.location = Some(parse_text(expr)?),
                    "contact" => changes.contact = Some(parse_text(expr)?),
                    "cuisines" => changes.cuisines = Some(parse_list(expr)?),
                    "opening" => changes.opening = Some(parse_text(expr)?),
                    "closing" => changes.closing = Some(parse_text(expr)?),
                    other => match TableSize::from_column(other) {
                        Some(size) => changes.capacity.set(size, parse_u32(expr)?),
                        None => return Err(SqlError::UnknownColumn(col)),
                    },
                }
            }
            Ok(Command::UpdateRestaurant {
                id: filters.ulid("id")?,
                changes,
            })
        }
        "reservations" => {
            if let Some(expr) = set.get("viewed") {
                if set.len() != 1 || !parse_bool(expr)? {
                    return Err(SqlError::Unsupported(
                        "viewed can only be set to true, on its own".into(),
                    ));
                }
                return Ok(Command::MarkViewed {
                    restaurant_id: filters.ulid("restaurant_id")?,
                });
            }
            let (mut date, mut time, mut tables) = (None, None, None::<TablesPatch>);
            for (col, expr) in set {
                match col.as_str() {
                    "date" => date = Some(parse_text(expr)?),
                    "time" => time = Some(parse_text(expr)?),
                    other => match TableSize::from_column(other) {
                        Some(size) => tables.get_or_insert_default().set(size, parse_u32(expr)?),
                        None => return Err(SqlError::UnknownColumn(col)),
                    },
                }
            }
            Ok(Command::UpdateReservation {
                id: filters.ulid("id")?,
                date,
                time,
                tables,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let tables = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    let first = tables
        .first()
        .ok_or_else(|| SqlError::Parse("DELETE without table".into()))?;
    let table = table_factor_name(&first.relation)?;
    if table != "reservations" {
        return Err(SqlError::UnknownTable(table));
    }
    let filters = collect_filters(delete.selection.as_ref())?;
    Ok(Command::DeleteReservation {
        id: filters.ulid("id")?,
    })
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let from = select
        .from
        .first()
        .ok_or_else(|| SqlError::Parse("SELECT without FROM".into()))?;
    let table = table_factor_name(&from.relation)?;
    let filters = collect_filters(select.selection.as_ref())?;

    match table.as_str() {
        "restaurants" => Ok(Command::SelectRestaurants {
            id: filters.optional_ulid("id")?,
        }),
        "availability" => Ok(Command::SelectAvailability {
            restaurant_id: filters.ulid("restaurant_id")?,
            date: filters.text("date")?,
            time: filters.text("time")?,
            exclude_id: filters.optional_ulid("exclude_id")?,
        }),
        "reservations" => {
            if let Some(id) = filters.optional_ulid("id")? {
                return Ok(Command::SelectReservation { id });
            }
            match filters.optional_ulid("restaurant_id")? {
                Some(restaurant_id) => Ok(Command::SelectRestaurantReservations {
                    restaurant_id,
                    from: filters.optional_text("date")?,
                }),
                None => Ok(Command::SelectDinerReservations),
            }
        }
        "unviewed" => Ok(Command::SelectUnviewed {
            restaurant_id: filters.ulid("restaurant_id")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `col = value` and `col >= value` conjuncts of a WHERE clause.
struct Filters<'a> {
    terms: HashMap<String, &'a Expr>,
}

impl<'a> Filters<'a> {
    fn get(&self, col: &'static str) -> Option<&'a Expr> {
        self.terms.get(col).copied()
    }

    fn ulid(&self, col: &'static str) -> Result<Ulid, SqlError> {
        parse_ulid(self.get(col).ok_or(SqlError::MissingFilter(col))?)
    }

    fn optional_ulid(&self, col: &'static str) -> Result<Option<Ulid>, SqlError> {
        self.get(col).map(parse_ulid).transpose()
    }

    fn text(&self, col: &'static str) -> Result<String, SqlError> {
        parse_text(self.get(col).ok_or(SqlError::MissingFilter(col))?)
    }

    fn optional_text(&self, col: &'static str) -> Result<Option<String>, SqlError> {
        self.get(col).map(parse_text).transpose()
    }
}

fn collect_filters(selection: Option<&Expr>) -> Result<Filters<'_>, SqlError> {
    fn walk<'a>(expr: &'a Expr, terms: &mut HashMap<String, &'a Expr>) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => walk(inner, terms),
            Expr::BinaryOp { left, op, right } => match op {
                ast::BinaryOperator::And => {
                    walk(left, terms)?;
                    walk(right, terms)
                }
                ast::BinaryOperator::Eq | ast::BinaryOperator::GtEq => {
                    let col = expr_column_name(left)
                        .ok_or_else(|| SqlError::Unsupported(format!("filter {expr}")))?;
                    terms.insert(col, right.as_ref());
                    Ok(())
                }
                _ => Err(SqlError::Unsupported(format!("filter {expr}"))),
            },
            _ => Err(SqlError::Unsupported(format!("filter {expr}"))),
        }
    }

    let mut terms = HashMap::new();
    if let Some(expr) = selection {
        walk(expr, &mut terms)?;
    }
    Ok(Filters { terms })
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

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn required<'a>(row: &HashMap<String, &'a Expr>, col: &'static str) -> Result<&'a Expr, SqlError> {
    row.get(col).copied().ok_or(SqlError::MissingColumn(col))
}

fn optional_text(row: &HashMap<String, &Expr>, col: &str) -> Result<Option<String>, SqlError> {
    match row.get(col) {
        Some(expr) => parse_nullable_text(expr),
        None => Ok(None),
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

/// String or bare number, as text. `NULL` is `None`.
fn parse_nullable_text(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(Some(s.clone())),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    parse_nullable_text(expr)?.ok_or_else(|| SqlError::Parse("unexpected NULL".into()))
}

/// Comma-separated list in a single string: `'italian, pizza'`.
fn parse_list(expr: &Expr) -> Result<Vec<String>, SqlError> {
    Ok(parse_nullable_text(expr)?
        .map(|s| {
            s.split(',')
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect()
        })
        .unwrap_or_default())
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_text(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID {s}: {e}")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        ..
    } = expr
    {
        return Err(SqlError::Parse(format!("negative count: {expr}")));
    }
    let s = parse_text(expr)?;
    s.trim()
        .parse()
        .map_err(|_| SqlError::Parse(format!("bad count: {s}")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        _ => Err(SqlError::Parse(format!("expected bool, got {expr}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    /// Only one statement per query string is executed.
    MultipleStatements(usize),
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
    BadChannel(String),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::MultipleStatements(n) => {
                write!(f, "expected a single statement, got {n}")
            }
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(expected, got) => {
                write!(f, "expected at most {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::BadChannel(c) => {
                write!(f, "invalid channel: {c} (expected {CHANNEL_PREFIX}{{id}})")
            }
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const RID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const ID: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    #[test]
    fn insert_restaurant_with_columns() {
        let sql = format!(
            "INSERT INTO restaurants (id, name, opening, closing, two_person, four_person, six_person, cuisines) \
             VALUES ('{RID}', 'Trattoria', '11:00', '23:00', 4, 2, 1, 'italian, pizza')"
        );
        let Command::InsertRestaurant(r) = parse_sql(&sql).unwrap() else {
            panic!("expected InsertRestaurant");
        };
        assert_eq!(r.id, ulid(RID));
        assert_eq!(r.name, "Trattoria");
        assert_eq!(r.opening, "11:00");
        assert_eq!(r.capacity, TableCounts::new(4, 2, 1));
        assert_eq!(r.cuisines, vec!["italian", "pizza"]);
        assert_eq!(r.location, None);
    }

    #[test]
    fn insert_restaurant_positional() {
        let sql = format!(
            "INSERT INTO restaurants VALUES ('{RID}', 'Bistro', '09:00', '17:00', 1, 0, 0, 'Main St', NULL)"
        );
        let Command::InsertRestaurant(r) = parse_sql(&sql).unwrap() else {
            panic!("expected InsertRestaurant");
        };
        assert_eq!(r.location.as_deref(), Some("Main St"));
        assert_eq!(r.contact, None);
        assert_eq!(r.capacity, TableCounts::new(1, 0, 0));
    }

    #[test]
    fn insert_restaurant_requires_hours() {
        let sql = format!("INSERT INTO restaurants (id, name) VALUES ('{RID}', 'x')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingColumn("opening"))));
    }

    #[test]
    fn insert_reservation() {
        let sql = format!(
            r#"INSERT INTO reservations (id, restaurant_id, "date", "time", two_person) VALUES ('{ID}', '{RID}', '2030-06-01', '19:00', 2)"#
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertReservation {
                id: ulid(ID),
                restaurant_id: ulid(RID),
                date: "2030-06-01".into(),
                time: "19:00".into(),
                tables: TableCounts::new(2, 0, 0),
            }
        );
    }

    #[test]
    fn negative_table_count_rejected() {
        let sql = format!(
            r#"INSERT INTO reservations (id, restaurant_id, "date", "time", two_person) VALUES ('{ID}', '{RID}', '2030-06-01', '19:00', -1)"#
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn update_reservation_is_partial() {
        let sql = format!(r#"UPDATE reservations SET "time" = '20:30', six_person = 1 WHERE id = '{ID}'"#);
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateReservation {
                id: ulid(ID),
                date: None,
                time: Some("20:30".into()),
                tables: Some(TablesPatch { two: None, four: None, six: Some(1) }),
            }
        );
    }

    #[test]
    fn update_viewed_marks_restaurant() {
        let sql = format!("UPDATE reservations SET viewed = true WHERE restaurant_id = '{RID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::MarkViewed { restaurant_id: ulid(RID) }
        );
        let sql = format!("UPDATE reservations SET viewed = false WHERE restaurant_id = '{RID}'");
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn update_restaurant_columns() {
        let sql = format!("UPDATE restaurants SET closing = '22:00', four_person = 5 WHERE id = '{RID}'");
        let Command::UpdateRestaurant { id, changes } = parse_sql(&sql).unwrap() else {
            panic!("expected UpdateRestaurant");
        };
        assert_eq!(id, ulid(RID));
        assert_eq!(changes.closing.as_deref(), Some("22:00"));
        assert_eq!(changes.capacity.four, Some(5));
        assert_eq!(changes.capacity.two, None);
        assert_eq!(changes.name, None);
    }

    #[test]
    fn update_unknown_column_errors() {
        let sql = format!("UPDATE restaurants SET stars = 5 WHERE id = '{RID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownColumn(_))));
    }

    #[test]
    fn delete_reservation() {
        let sql = format!("DELETE FROM reservations WHERE id = '{ID}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::DeleteReservation { id: ulid(ID) });
    }

    #[test]
    fn delete_requires_id() {
        assert!(matches!(
            parse_sql("DELETE FROM reservations"),
            Err(SqlError::MissingFilter("id"))
        ));
    }

    #[test]
    fn select_availability() {
        let sql = format!(
            r#"SELECT * FROM availability WHERE restaurant_id = '{RID}' AND "date" = '2030-06-01' AND "time" = '19:00' AND exclude_id = '{ID}'"#
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAvailability {
                restaurant_id: ulid(RID),
                date: "2030-06-01".into(),
                time: "19:00".into(),
                exclude_id: Some(ulid(ID)),
            }
        );
    }

    #[test]
    fn select_availability_requires_time() {
        let sql = format!(r#"SELECT * FROM availability WHERE restaurant_id = '{RID}' AND "date" = '2030-06-01'"#);
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("time"))));
    }

    #[test]
    fn select_reservation_variants() {
        assert_eq!(
            parse_sql(&format!("SELECT * FROM reservations WHERE id = '{ID}'")).unwrap(),
            Command::SelectReservation { id: ulid(ID) }
        );
        assert_eq!(
            parse_sql(&format!(
                r#"SELECT * FROM reservations WHERE restaurant_id = '{RID}' AND "date" >= '2030-01-01'"#
            ))
            .unwrap(),
            Command::SelectRestaurantReservations {
                restaurant_id: ulid(RID),
                from: Some("2030-01-01".into()),
            }
        );
        assert_eq!(
            parse_sql("SELECT * FROM reservations").unwrap(),
            Command::SelectDinerReservations
        );
    }

    #[test]
    fn select_restaurants_and_unviewed() {
        assert_eq!(
            parse_sql("SELECT * FROM restaurants").unwrap(),
            Command::SelectRestaurants { id: None }
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM unviewed WHERE restaurant_id = '{RID}'")).unwrap(),
            Command::SelectUnviewed { restaurant_id: ulid(RID) }
        );
    }

    #[test]
    fn listen_and_unlisten() {
        assert_eq!(
            parse_sql(&format!("LISTEN restaurant_{RID}")).unwrap(),
            Command::Listen { restaurant_id: ulid(RID) }
        );
        assert_eq!(
            parse_sql(&format!("unlisten restaurant_{RID};")).unwrap(),
            Command::Unlisten { restaurant_id: ulid(RID) }
        );
        assert_eq!(parse_sql("UNLISTEN *").unwrap(), Command::UnlistenAll);
        assert!(matches!(
            parse_sql(&format!("LISTEN resource_{RID}")),
            Err(SqlError::BadChannel(_))
        ));
    }

    #[test]
    fn set_session_variables() {
        assert_eq!(
            parse_sql("SET email = 'ada@example.com'").unwrap(),
            Command::Set { name: "email".into(), value: "ada@example.com".into() }
        );
        assert_eq!(
            parse_sql("SET role TO owner").unwrap(),
            Command::Set { name: "role".into(), value: "owner".into() }
        );
    }

    #[test]
    fn channel_name_round_trips() {
        let rid = ulid(RID);
        assert_eq!(channel_restaurant(&channel_name(rid)).unwrap(), rid);
    }

    #[test]
    fn unknown_table_errors() {
        let sql = format!("INSERT INTO bookings (id) VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }

    #[test]
    fn multiple_statements_rejected() {
        let sql = format!("SELECT * FROM restaurants; DELETE FROM reservations WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MultipleStatements(2))));
        let sql = format!("SET role = 'owner'; DELETE FROM reservations WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MultipleStatements(2))));
        assert!(parse_sql("SELECT * FROM restaurants;").is_ok());
    }
}
