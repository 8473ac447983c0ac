//! Flattener
//!
//! Streams a JSON body through `serde_json`'s deserializer and emits one
//! [`JsonRecord`] per scalar or null leaf, in document order:
//!
//! ```text
//! base /doc, body {"items":[10,null,30]}
//!
//!   /doc/items/[0/   "10"  Number
//!   /doc/items/[1/   ""    Null
//!   /doc/items/[2/   "30"  Number
//! ```
//!
//! Nothing is materialised: records reach the sink while the body is still
//! being parsed. A sink failure or an invalid key aborts the parse and is
//! reported in place of the parser error it triggers.
//!
//! Numbers are stored as the exact text of their token, so integers wider
//! than 64 bits and long decimals survive unchanged. This relies on
//! `serde_json`'s `arbitrary_precision` feature.
//!
//! `serde_json` refuses bodies nested 128 or more containers deep; those are
//! reported as [`Error::Format`].

use crate::error::{Error, Result};
use crate::path::{encode_index, validate_key, JsonPath, PathSegment, SEPARATOR};
use crate::record::{JsonRecord, RecordSink, ValueKind};
use serde::de::{self, DeserializeSeed, MapAccess, SeqAccess, Visitor};
use std::fmt;
use std::io;

/// Key under which `serde_json` with `arbitrary_precision` hands a number
/// token to `visit_map`, as a single entry whose value is the token text
const NUMBER_TOKEN: &str = "$serde_json::private::Number";

/// Sink for [`flatten_fields`]: told about each top-level field before the
/// field's records arrive, so it can clear whatever was stored there.
pub trait FieldSink: RecordSink {
    /// Called once per top-level field, before its value is flattened.
    fn begin_field(&mut self, path: &JsonPath) -> Result<()>;
}

impl<S: FieldSink + ?Sized> FieldSink for &mut S {
    fn begin_field(&mut self, path: &JsonPath) -> Result<()> {
        (**self).begin_field(path)
    }
}

/// Flatten a complete JSON body held in memory.
pub fn flatten_slice<S: RecordSink>(base: &JsonPath, body: &[u8], sink: &mut S) -> Result<()> {
    flatten_with(serde_json::Deserializer::from_slice(body), base, sink)
}

/// Flatten a JSON body read incrementally from `reader`.
pub fn flatten_reader<R: io::Read, S: RecordSink>(
    base: &JsonPath,
    reader: R,
    sink: &mut S,
) -> Result<()> {
    flatten_with(serde_json::Deserializer::from_reader(reader), base, sink)
}

/// Flatten every top-level field of an object body as its own subtree.
///
/// Field names are caller path segments: numeric names address array slots
/// under `base`. Any body whose root is not an object is a format error.
pub fn flatten_fields<S: FieldSink>(base: &JsonPath, body: &[u8], sink: &mut S) -> Result<()> {
    let mut de = serde_json::Deserializer::from_slice(body);
    let mut ctx = Context::new(sink);
    let outcome = FieldsSeed {
        ctx: &mut ctx,
        base,
    }
    .deserialize(&mut de);
    ctx.finish(outcome)?;
    de.end()?;
    Ok(())
}

fn flatten_with<'de, R, S>(
    mut de: serde_json::Deserializer<R>,
    base: &JsonPath,
    sink: &mut S,
) -> Result<()>
where
    R: serde_json::de::Read<'de>,
    S: RecordSink,
{
    let mut ctx = Context::new(sink);
    let outcome = NodeSeed {
        ctx: &mut ctx,
        path: base.db_prefix(),
    }
    .deserialize(&mut de);
    ctx.finish(outcome)?;
    // Anything after the value is a format error
    de.end()?;
    Ok(())
}

// =============================================================================
// Visitor plumbing
// =============================================================================

struct Context<'s, S: ?Sized> {
    sink: &'s mut S,
    failure: Option<Error>,
}

impl<'s, S: RecordSink + ?Sized> Context<'s, S> {
    fn new(sink: &'s mut S) -> Self {
        Context {
            sink,
            failure: None,
        }
    }

    /// Stash `err` and hand the parser an error that stops it.
    fn abort<E: de::Error>(&mut self, err: Error) -> E {
        let message = err.to_string();
        self.failure = Some(err);
        E::custom(message)
    }

    fn emit<E: de::Error>(&mut self, record: JsonRecord) -> std::result::Result<(), E> {
        match self.sink.accept(record) {
            Ok(()) => Ok(()),
            Err(err) => Err(self.abort(err)),
        }
    }

    fn finish(&mut self, outcome: std::result::Result<(), serde_json::Error>) -> Result<()> {
        match (self.failure.take(), outcome) {
            (Some(err), _) => Err(err),
            (None, Err(err)) => Err(err.into()),
            (None, Ok(())) => Ok(()),
        }
    }
}

/// One JSON value to be stored under `path` (a storage prefix ending in `/`).
struct NodeSeed<'c, 's, S: ?Sized> {
    ctx: &'c mut Context<'s, S>,
    path: String,
}

impl<'de, 'c, 's, S: RecordSink + ?Sized> DeserializeSeed<'de> for NodeSeed<'c, 's, S> {
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> std::result::Result<(), D::Error>
    where
        D: de::Deserializer<'de>,
    {
        deserializer.deserialize_any(self)
    }
}

impl<'de, 'c, 's, S: RecordSink + ?Sized> Visitor<'de> for NodeSeed<'c, 's, S> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<(), E> {
        let text = if v { "true" } else { "false" };
        self.ctx
            .emit(JsonRecord::new(self.path, text, ValueKind::from_bool(v)))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<(), E> {
        self.ctx
            .emit(JsonRecord::new(self.path, v.to_string(), ValueKind::Number))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<(), E> {
        self.ctx
            .emit(JsonRecord::new(self.path, v.to_string(), ValueKind::Number))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<(), E> {
        let text = match serde_json::Number::from_f64(v) {
            Some(n) => n.to_string(),
            None => return Err(E::custom("non-finite number")),
        };
        self.ctx.emit(JsonRecord::new(self.path, text, ValueKind::Number))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<(), E> {
        self.ctx.emit(JsonRecord::new(self.path, v, ValueKind::String))
    }

    fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<(), E> {
        self.ctx.emit(JsonRecord::new(self.path, v, ValueKind::String))
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<(), E> {
        self.ctx.emit(JsonRecord::null(self.path))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<(), A::Error> {
        let mut index: u64 = 0;
        loop {
            let mut path = String::with_capacity(self.path.len() + 8);
            path.push_str(&self.path);
            path.push_str(&encode_index(index));
            path.push(SEPARATOR);

            let child = NodeSeed {
                ctx: &mut *self.ctx,
                path,
            };
            if seq.next_element_seed(child)?.is_none() {
                return Ok(());
            }
            index += 1;
        }
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<(), A::Error> {
        let mut first = true;
        while let Some(key) = map.next_key::<String>()? {
            if first && key == NUMBER_TOKEN {
                let text: String = map.next_value()?;
                // A literal object using the token as its key is not a number
                if serde_json::from_str::<serde_json::Number>(&text).is_ok() {
                    return self
                        .ctx
                        .emit(JsonRecord::new(self.path, text, ValueKind::Number));
                }
            }
            first = false;
            if let Err(err) = validate_key(&key) {
                return Err(self.ctx.abort(err));
            }
            let mut path = String::with_capacity(self.path.len() + key.len() + 1);
            path.push_str(&self.path);
            path.push_str(&key);
            path.push(SEPARATOR);

            map.next_value_seed(NodeSeed {
                ctx: &mut *self.ctx,
                path,
            })?;
        }
        Ok(())
    }
}

/// Root of an update body: an object whose fields are flattened one by one.
struct FieldsSeed<'c, 's, 'b, S: ?Sized> {
    ctx: &'c mut Context<'s, S>,
    base: &'b JsonPath,
}

impl<'de, 'c, 's, 'b, S: FieldSink + ?Sized> DeserializeSeed<'de> for FieldsSeed<'c, 's, 'b, S> {
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> std::result::Result<(), D::Error>
    where
        D: de::Deserializer<'de>,
    {
        deserializer.deserialize_map(self)
    }
}

impl<'de, 'c, 's, 'b, S: FieldSink + ?Sized> Visitor<'de> for FieldsSeed<'c, 's, 'b, S> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<(), A::Error> {
        let mut indexed: Option<bool> = None;
        while let Some(key) = map.next_key::<String>()? {
            let segment = match PathSegment::parse(&key) {
                Ok(segment) => segment,
                Err(err) => return Err(self.ctx.abort(err)),
            };
            // Each field clears the other container kind, so a mix would
            // silently drop earlier fields
            let is_index = matches!(segment, PathSegment::Index(_));
            match indexed {
                Some(kind) if kind != is_index => {
                    return Err(self.ctx.abort(Error::Format(format!(
                        "update body mixes array indices and object keys at '{}'",
                        key
                    ))));
                }
                _ => indexed = Some(is_index),
            }
            let field = self.base.clone().child(segment);
            if let Err(err) = self.ctx.sink.begin_field(&field) {
                return Err(self.ctx.abort(err));
            }
            map.next_value_seed(NodeSeed {
                ctx: &mut *self.ctx,
                path: field.db_prefix(),
            })?;
        }
        Ok(())
    }
}
