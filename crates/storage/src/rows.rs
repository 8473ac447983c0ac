//! Row operations on the documents table
//!
//! A subtree at storage prefix `P` is the half-open range
//! `P <= path < prefix_upper_bound(P)`. Range predicates are used instead of
//! `LIKE 'P%'` because `_` is a valid key character and a `LIKE` wildcard.
//!
//! Index segments start with `[`, which keys may not contain, so the indexed
//! children of `P` are exactly the range `P[ <= path < P\`.

use crate::dialect::RegexDialect;
use crate::schema::TABLE;
use jsondb_core::error::{Error, Result};
use jsondb_core::options::{KeyRange, Order};
use jsondb_core::path::{prefix_upper_bound, JsonPath, PathSegment, INDEX_MARKER, SEPARATOR};
use jsondb_core::reconstruct::Flow;
use jsondb_core::record::{JsonRecord, ValueKind};
use regex::Regex;
use rusqlite::{params, params_from_iter, Connection, Row};
use std::collections::BTreeSet;
use tracing::{debug, warn};

fn subtree_bounds(base: &JsonPath, range: Option<&KeyRange>) -> (String, String) {
    let prefix = base.db_prefix();
    let mut upper = prefix_upper_bound(&prefix);
    let mut lower = prefix;
    if let Some(range) = range {
        if let Some(bound) = &range.lower {
            if *bound > lower {
                lower = bound.clone();
            }
        }
        if let Some(bound) = &range.upper {
            if *bound < upper {
                upper = bound.clone();
            }
        }
    }
    (lower, upper)
}

/// The range holding the indexed children of `prefix`.
fn index_children(prefix: &str) -> (String, String) {
    let lower = format!("{prefix}{INDEX_MARKER}");
    // '\\' is the character immediately after '['
    let upper = format!("{prefix}\\");
    (lower, upper)
}

fn read_record(row: &Row<'_>) -> Result<JsonRecord> {
    Ok(JsonRecord {
        path: row.get(0)?,
        value: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        kind: ValueKind::from_code(row.get(2)?)?,
    })
}

/// First segment of `path` below a prefix of length `prefix_len`.
fn top_segment(path: &str, prefix_len: usize) -> &str {
    let rest = path.get(prefix_len..).unwrap_or_default();
    rest.split(SEPARATOR).next().unwrap_or_default()
}

/// Stream the records under `base`.
///
/// With [`Order::Asc`] records arrive in path order. With [`Order::Desc`] the
/// top-level children arrive highest first while the records inside each
/// child stay in path order; one child's records are buffered at a time.
///
/// `visit` may stop the scan early by returning [`Flow::Stop`]. Returns the
/// number of records delivered.
pub fn scan_subtree(
    conn: &Connection,
    base: &JsonPath,
    range: &KeyRange,
    visit: &mut dyn FnMut(JsonRecord) -> Result<Flow>,
) -> Result<usize> {
    let (lower, upper) = subtree_bounds(base, Some(range));
    if lower >= upper {
        return Ok(0);
    }

    let direction = match range.order {
        Order::Asc => "ASC",
        Order::Desc => "DESC",
    };
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT path, value, kind FROM {TABLE} WHERE path >= ?1 AND path < ?2 ORDER BY path {direction}"
    ))?;
    let mut rows = stmt.query(params![lower, upper])?;

    let mut delivered = 0;
    match range.order {
        Order::Asc => {
            while let Some(row) = rows.next()? {
                delivered += 1;
                if visit(read_record(row)?)? == Flow::Stop {
                    break;
                }
            }
        }
        Order::Desc => {
            let prefix_len = base.db_prefix().len();
            let mut child: Vec<JsonRecord> = Vec::new();
            while let Some(row) = rows.next()? {
                let record = read_record(row)?;
                let boundary = child.last().map_or(false, |last| {
                    top_segment(&last.path, prefix_len) != top_segment(&record.path, prefix_len)
                });
                if boundary && replay(&mut child, visit, &mut delivered)? == Flow::Stop {
                    return Ok(delivered);
                }
                child.push(record);
            }
            replay(&mut child, visit, &mut delivered)?;
        }
    }
    Ok(delivered)
}

/// Hand a child's records, collected highest first, to `visit` in path order.
fn replay(
    child: &mut Vec<JsonRecord>,
    visit: &mut dyn FnMut(JsonRecord) -> Result<Flow>,
    delivered: &mut usize,
) -> Result<Flow> {
    for record in child.drain(..).rev() {
        *delivered += 1;
        if visit(record)? == Flow::Stop {
            return Ok(Flow::Stop);
        }
    }
    Ok(Flow::Continue)
}

/// Whether any record lies under `base`.
pub fn subtree_exists(conn: &Connection, base: &JsonPath) -> Result<bool> {
    let (lower, upper) = subtree_bounds(base, None);
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT EXISTS (SELECT 1 FROM {TABLE} WHERE path >= ?1 AND path < ?2)"
    ))?;
    let exists: bool = stmt.query_row(params![lower, upper], |row| row.get(0))?;
    Ok(exists)
}

/// Number of records under `base`.
pub fn count_subtree(conn: &Connection, base: &JsonPath) -> Result<u64> {
    let (lower, upper) = subtree_bounds(base, None);
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT COUNT(*) FROM {TABLE} WHERE path >= ?1 AND path < ?2"
    ))?;
    let count: i64 = stmt.query_row(params![lower, upper], |row| row.get(0))?;
    Ok(count.max(0) as u64)
}

/// Delete the subtree at `path` together with any leaf stored at one of its
/// ancestors. Returns the number of rows removed.
pub fn delete_subtree(conn: &Connection, path: &JsonPath) -> Result<usize> {
    let (lower, upper) = subtree_bounds(path, None);
    let ancestors = path.ancestor_prefixes();

    let mut sql = format!("DELETE FROM {TABLE} WHERE (path >= ? AND path < ?)");
    if !ancestors.is_empty() {
        sql.push_str(" OR path IN (");
        sql.push_str(&vec!["?"; ancestors.len()].join(", "));
        sql.push(')');
    }

    let mut bound = Vec::with_capacity(ancestors.len() + 2);
    bound.push(lower);
    bound.push(upper);
    bound.extend(ancestors);

    let removed = conn.execute(&sql, params_from_iter(bound.iter()))?;
    debug!(target: "jsondb::txn", path = %path, removed, "Deleted subtree");
    Ok(removed)
}

/// Make room for a new value at `path`. Returns the number of rows removed.
///
/// Besides [`delete_subtree`], every ancestor level loses the siblings of the
/// other container kind: writing an index under a container drops its keyed
/// members, writing a key drops its indexed members. After this, nothing
/// stored conflicts with writing a new value at `path`.
pub fn clear_for_write(conn: &Connection, path: &JsonPath) -> Result<usize> {
    let mut removed = delete_subtree(conn, path)?;

    let mut parent = JsonPath::root();
    for segment in path.segments() {
        let prefix = parent.db_prefix();
        let (index_lower, index_upper) = index_children(&prefix);
        removed += match segment {
            PathSegment::Index(_) => conn.execute(
                &format!(
                    "DELETE FROM {TABLE} WHERE path > ?1 AND path < ?2 AND NOT (path >= ?3 AND path < ?4)"
                ),
                params![prefix, prefix_upper_bound(&prefix), index_lower, index_upper],
            )?,
            PathSegment::Key(_) => conn.execute(
                &format!("DELETE FROM {TABLE} WHERE path >= ?1 AND path < ?2"),
                params![index_lower, index_upper],
            )?,
        };
        parent = parent.child(segment.clone());
    }

    debug!(target: "jsondb::txn", path = %path, removed, "Cleared for write");
    Ok(removed)
}

/// Insert records with one cached prepared statement.
pub fn insert_records(conn: &Connection, records: &[JsonRecord]) -> Result<()> {
    let mut stmt = conn.prepare_cached(&format!(
        "INSERT INTO {TABLE} (path, value, kind) VALUES (?1, ?2, ?3)"
    ))?;
    for record in records {
        stmt.execute(params![record.path, record.value, record.kind.code()])?;
    }
    Ok(())
}

/// Paths of the members of `collection` whose `property` is stored as `value`.
///
/// Members are keys of the form `:<id>` directly under `collection`, and each
/// result is the member's path, `/<collection>/:<id>`. The property is matched
/// at `property`'s depth below the member. The comparison is on the stored
/// text whatever the value's kind, so `"5"` finds both `5` and `"5"`. This is
/// an unindexed scan of the whole table.
pub fn find_ids_by_property(
    conn: &Connection,
    dialect: RegexDialect,
    collection: &JsonPath,
    property: &JsonPath,
    value: &str,
) -> Result<BTreeSet<String>> {
    let property_prefix = property.db_prefix();
    let pattern = format!(
        "^{}:([^/]+)/{}$",
        regex::escape(&collection.db_prefix()),
        regex::escape(property_prefix.trim_start_matches('/'))
    );
    let matcher = Regex::new(&pattern).map_err(|e| Error::Format(e.to_string()))?;

    warn!(
        target: "jsondb::query",
        collection = %collection,
        property = %property,
        "Property lookup scans the whole table"
    );

    let mut stmt = conn.prepare(&format!(
        "SELECT path FROM {TABLE} WHERE {} AND value = ?",
        dialect.predicate("path")
    ))?;
    let mut rows = stmt.query(params![pattern, value])?;

    let mut ids = BTreeSet::new();
    while let Some(row) = rows.next()? {
        let path: String = row.get(0)?;
        if let Some(id) = matcher.captures(&path).and_then(|c| c.get(1)) {
            let member = PathSegment::key(format!(":{}", id.as_str()))?;
            ids.insert(collection.clone().child(member).to_string());
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::DatabaseKind;
    use crate::pool::register_regexp;
    use crate::schema::create_tables;
    use jsondb_core::flatten::flatten_slice;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        register_regexp(&conn).unwrap();
        create_tables(&conn, DatabaseKind::Sqlite).unwrap();
        conn
    }

    fn store(conn: &Connection, path: &str, body: &str) {
        let mut records = Vec::new();
        flatten_slice(&JsonPath::parse(path).unwrap(), body.as_bytes(), &mut records).unwrap();
        insert_records(conn, &records).unwrap();
    }

    fn all_paths(conn: &Connection) -> Vec<String> {
        let mut paths = Vec::new();
        scan_subtree(conn, &JsonPath::root(), &KeyRange::default(), &mut |r: JsonRecord| {
            paths.push(r.path);
            Ok(Flow::Continue)
        })
        .unwrap();
        paths
    }

    #[test]
    fn test_scan_is_path_ordered_and_scoped() {
        let conn = setup();
        store(&conn, "/doc", r#"{"items":[1,2,3,4,5,6,7,8,9,10,11],"b":true}"#);
        store(&conn, "/doc_other", r#"{"x":1}"#);

        let mut paths = Vec::new();
        let base = JsonPath::parse("/doc").unwrap();
        let n = scan_subtree(&conn, &base, &KeyRange::default(), &mut |r: JsonRecord| {
            paths.push(r.path);
            Ok(Flow::Continue)
        })
        .unwrap();
        assert_eq!(n, 12);
        assert_eq!(paths[0], "/doc/b/");
        assert_eq!(paths[10], "/doc/items/[9/");
        assert_eq!(paths[11], "/doc/items/[[210/");
        assert!(paths.iter().all(|p| p.starts_with("/doc/")));
    }

    #[test]
    fn test_scan_stops_on_request() {
        let conn = setup();
        store(&conn, "/", r#"{"a":1,"b":2,"c":3}"#);
        let mut seen = 0;
        let n = scan_subtree(&conn, &JsonPath::root(), &KeyRange::default(), &mut |_: JsonRecord| {
            seen += 1;
            Ok(if seen == 2 { Flow::Stop } else { Flow::Continue })
        })
        .unwrap();
        assert_eq!(n, 2);
    }

    #[test]
    fn test_scan_applies_key_range() {
        let conn = setup();
        store(&conn, "/t", r#"{"a":1,"b":{"x":2},"c":3,"d":4}"#);
        let range = KeyRange {
            lower: Some("/t/b".into()),
            upper: Some("/t/d".into()),
            ..KeyRange::default()
        };
        let mut paths = Vec::new();
        scan_subtree(&conn, &JsonPath::parse("/t").unwrap(), &range, &mut |r: JsonRecord| {
            paths.push(r.path);
            Ok(Flow::Continue)
        })
        .unwrap();
        assert_eq!(paths, vec!["/t/b/x/", "/t/c/"]);
    }

    #[test]
    fn test_underscore_is_not_a_wildcard() {
        let conn = setup();
        store(&conn, "/a_b", "1");
        store(&conn, "/axb", "2");
        assert_eq!(count_subtree(&conn, &JsonPath::parse("/a_b").unwrap()).unwrap(), 1);
        delete_subtree(&conn, &JsonPath::parse("/a_b").unwrap()).unwrap();
        assert_eq!(all_paths(&conn), vec!["/axb/"]);
    }

    #[test]
    fn test_delete_removes_ancestor_leaves_only() {
        let conn = setup();
        store(&conn, "/a", "1");
        store(&conn, "/a2", "2");
        store(&conn, "/", r#"{"z":{"y":1}}"#);

        let removed = delete_subtree(&conn, &JsonPath::parse("/a/b/c").unwrap()).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(all_paths(&conn), vec!["/a2/", "/z/y/"]);
    }

    #[test]
    fn test_exists_and_count() {
        let conn = setup();
        let doc = JsonPath::parse("/doc").unwrap();
        assert!(!subtree_exists(&conn, &doc).unwrap());
        store(&conn, "/doc", r#"{"a":[1,null]}"#);
        assert!(subtree_exists(&conn, &doc).unwrap());
        assert!(subtree_exists(&conn, &JsonPath::parse("/doc/a/1").unwrap()).unwrap());
        assert!(!subtree_exists(&conn, &JsonPath::parse("/do").unwrap()).unwrap());
        assert_eq!(count_subtree(&conn, &doc).unwrap(), 2);
    }

    #[test]
    fn test_duplicate_insert_is_storage_error() {
        let conn = setup();
        let record = JsonRecord::new("/a/", "1", ValueKind::Number);
        insert_records(&conn, &[record.clone()]).unwrap();
        assert!(matches!(
            insert_records(&conn, &[record]),
            Err(Error::Storage(_))
        ));
    }

    #[test]
    fn test_find_ids_by_property() {
        let conn = setup();
        store(
            &conn,
            "/integrations",
            r#"{
                ":i1": {"name": "alpha", "tags": {"name": "alpha"}},
                ":i2": {"name": "beta"},
                ":i3": {"name": "alpha"},
                "plain": {"name": "alpha"}
            }"#,
        );
        store(&conn, "/other", r#"{":o1": {"name": "alpha"}}"#);

        let ids = find_ids_by_property(
            &conn,
            RegexDialect::Regexp,
            &JsonPath::parse("/integrations").unwrap(),
            &JsonPath::parse("name").unwrap(),
            "alpha",
        )
        .unwrap();
        assert_eq!(
            ids.into_iter().collect::<Vec<_>>(),
            vec!["/integrations/:i1", "/integrations/:i3"]
        );
    }

    #[test]
    fn test_find_ids_compares_stored_text_of_any_kind() {
        let conn = setup();
        store(&conn, "/c", r#"{":a": {"n": "5"}, ":b": {"n": 5}, ":c": {"n": 6}}"#);
        store(&conn, "/flags", r#"{":x": {"on": true}, ":y": {"on": false}}"#);

        let find = |collection: &str, property: &str, value: &str| {
            find_ids_by_property(
                &conn,
                RegexDialect::Regexp,
                &JsonPath::parse(collection).unwrap(),
                &JsonPath::parse(property).unwrap(),
                value,
            )
            .unwrap()
            .into_iter()
            .collect::<Vec<_>>()
        };
        assert_eq!(find("/c", "n", "5"), vec!["/c/:a", "/c/:b"]);
        assert_eq!(find("/flags", "on", "true"), vec!["/flags/:x"]);
    }

    #[test]
    fn test_find_ids_under_root_collection() {
        let conn = setup();
        store(&conn, "/", r#"{":id": {"key": "value"}}"#);
        let ids = find_ids_by_property(
            &conn,
            RegexDialect::Regexp,
            &JsonPath::root(),
            &JsonPath::parse("key").unwrap(),
            "value",
        )
        .unwrap();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec!["/:id"]);
    }

    #[test]
    fn test_descending_scan_reverses_children_only() {
        let conn = setup();
        store(&conn, "/t", r#"{"a":1,"b":{"x":2,"y":3},"c":4}"#);
        store(&conn, "/u", "9");

        let range = KeyRange {
            order: Order::Desc,
            ..KeyRange::default()
        };
        let mut paths = Vec::new();
        let n = scan_subtree(&conn, &JsonPath::parse("/t").unwrap(), &range, &mut |r: JsonRecord| {
            paths.push(r.path);
            Ok(Flow::Continue)
        })
        .unwrap();
        assert_eq!(n, 4);
        assert_eq!(paths, vec!["/t/c/", "/t/b/x/", "/t/b/y/", "/t/a/"]);
    }

    #[test]
    fn test_descending_scan_stops_on_request() {
        let conn = setup();
        store(&conn, "/", r#"{"a":{"x":1,"y":2},"b":{"x":3,"y":4}}"#);
        let range = KeyRange {
            order: Order::Desc,
            ..KeyRange::default()
        };
        let mut paths = Vec::new();
        let n = scan_subtree(&conn, &JsonPath::root(), &range, &mut |r: JsonRecord| {
            paths.push(r.path);
            Ok(if paths.len() == 3 { Flow::Stop } else { Flow::Continue })
        })
        .unwrap();
        assert_eq!(n, 3);
        assert_eq!(paths, vec!["/b/x/", "/b/y/", "/a/x/"]);
    }

    #[test]
    fn test_clear_for_write_drops_other_container_kind() {
        let conn = setup();
        store(&conn, "/a", "[1,2]");
        store(&conn, "/b", r#"{"k":1}"#);

        let removed = clear_for_write(&conn, &JsonPath::parse("/a/x").unwrap()).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(all_paths(&conn), vec!["/b/k/"]);

        store(&conn, "/a", r#"{"x":1,"y":{"z":2}}"#);
        let removed = clear_for_write(&conn, &JsonPath::parse("/a/0").unwrap()).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(all_paths(&conn), vec!["/b/k/"]);
    }

    #[test]
    fn test_clear_for_write_keeps_same_kind_siblings() {
        let conn = setup();
        store(&conn, "/a", r#"{"x":1,"y":[5,6]}"#);
        clear_for_write(&conn, &JsonPath::parse("/a/y/1").unwrap()).unwrap();
        assert_eq!(all_paths(&conn), vec!["/a/x/", "/a/y/[0/"]);

        clear_for_write(&conn, &JsonPath::parse("/a/z").unwrap()).unwrap();
        assert_eq!(all_paths(&conn), vec!["/a/x/", "/a/y/[0/"]);
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;
        use proptest::prelude::prop;

        fn arb_path() -> impl Strategy<Value = String> {
            prop::collection::vec(prop_oneof!["[ab_]{1,2}", "[0-9]{1,2}"], 1..4)
                .prop_map(|segments| format!("/{}", segments.join("/")))
        }

        proptest! {
            #[test]
            fn prop_delete_touches_only_subtree_and_ancestors(
                paths in prop::collection::btree_set(arb_path(), 1..12),
                target in arb_path(),
            ) {
                let conn = setup();
                // "/1" and "/01" share a stored path
                let stored: BTreeSet<String> = paths
                    .iter()
                    .map(|p| JsonPath::parse(p).unwrap().db_prefix())
                    .collect();
                let records: Vec<JsonRecord> = stored
                    .iter()
                    .map(|p| JsonRecord::new(p.clone(), "1", ValueKind::Number))
                    .collect();
                insert_records(&conn, &records).unwrap();

                let target = JsonPath::parse(&target).unwrap();
                let prefix = target.db_prefix();
                let ancestors = target.ancestor_prefixes();
                delete_subtree(&conn, &target).unwrap();

                let expected: Vec<String> = stored
                    .into_iter()
                    .filter(|p| !p.starts_with(&prefix) && !ancestors.contains(p))
                    .collect();
                prop_assert_eq!(all_paths(&conn), expected);
            }
        }
    }
}
