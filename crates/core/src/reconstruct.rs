//! Reconstructor
//!
//! Rebuilds one JSON value from leaf records delivered in path order.
//!
//! The writer keeps an explicit stack of open containers. Frame `i` is the
//! container at depth `i` below the base path and remembers which of its slots
//! is currently open. For each record:
//!
//! 1. keep the frames whose open slots match the record's leading segments
//! 2. close every deeper frame
//! 3. enter the record's slot in each remaining level, opening containers as
//!    needed and filling array gaps with `null`
//! 4. write the scalar
//!
//! Output is produced through a `serde_json` [`Formatter`], so compact and
//! pretty printing share one code path. Nothing at all is written until the
//! first record arrives.
//!
//! Under [`Order::Desc`] the top-level children arrive highest first. A
//! top-level array is then written in descending index order and holes in it
//! are skipped rather than filled.

use crate::error::{Error, Result};
use crate::options::{GetOptions, Order};
use crate::path::{decode_index, is_index_segment, JsonPath, SEPARATOR};
use crate::record::{JsonRecord, ValueKind};
use serde_json::ser::{CompactFormatter, Formatter, PrettyFormatter};
use std::io::Write;

/// Whether the record source should keep delivering records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Deliver the next record
    Continue,
    /// The writer needs no more records
    Stop,
}

#[derive(Debug)]
enum Container {
    Object,
    Array { next_index: u64 },
    /// Top-level array listed in descending order; `below` is the last index written
    ReversedArray { below: Option<u64> },
}

#[derive(Debug)]
struct Frame {
    container: Container,
    /// Stored segment of the slot currently open in this container
    entry: Option<String>,
}

/// Streaming writer that turns path-ordered records into JSON text
pub struct RecordWriter<W, F> {
    writer: W,
    formatter: F,
    base: String,
    depth: Option<usize>,
    limit: Option<usize>,
    callback: Option<String>,
    descending: bool,
    frames: Vec<Frame>,
    started: bool,
    top_level_seen: usize,
    last_top: Option<String>,
    last_collapsed: Option<String>,
}

impl<W: Write> RecordWriter<W, CompactFormatter> {
    /// Writer producing compact JSON
    pub fn compact(writer: W, base: &JsonPath, options: &GetOptions) -> Self {
        RecordWriter::with_formatter(writer, CompactFormatter, base, options)
    }
}

impl<W: Write> RecordWriter<W, PrettyFormatter<'static>> {
    /// Writer producing indented JSON
    pub fn pretty(writer: W, base: &JsonPath, options: &GetOptions) -> Self {
        RecordWriter::with_formatter(writer, PrettyFormatter::new(), base, options)
    }
}

impl<W: Write, F: Formatter> RecordWriter<W, F> {
    /// Writer with an explicit formatter
    pub fn with_formatter(writer: W, formatter: F, base: &JsonPath, options: &GetOptions) -> Self {
        RecordWriter {
            writer,
            formatter,
            base: base.db_prefix(),
            depth: options.effective_depth(),
            limit: options.limit_to_first,
            callback: options.callback.clone(),
            descending: options.order == Order::Desc,
            frames: Vec::new(),
            started: false,
            top_level_seen: 0,
            last_top: None,
            last_collapsed: None,
        }
    }

    /// Whether any output has been written
    pub fn has_output(&self) -> bool {
        self.started
    }

    /// Feed the next record.
    ///
    /// Records must lie under the base path and arrive sorted by path. Under
    /// [`Order::Desc`] the top-level children come in descending order, the
    /// records of each child still ascending.
    pub fn accept(&mut self, record: &JsonRecord) -> Result<Flow> {
        let relative = record.path.strip_prefix(self.base.as_str()).ok_or_else(|| {
            Error::Corruption(format!(
                "record '{}' lies outside of '{}'",
                record.path, self.base
            ))
        })?;
        let segments: Vec<&str> = relative.split(SEPARATOR).filter(|s| !s.is_empty()).collect();

        if let Some(top) = segments.first() {
            if self.last_top.as_deref() != Some(*top) {
                if let Some(limit) = self.limit {
                    if self.top_level_seen >= limit {
                        return Ok(Flow::Stop);
                    }
                }
                self.top_level_seen += 1;
                self.last_top = Some((*top).to_string());
            }
        }

        match self.depth {
            Some(depth) if segments.len() > depth => {
                let collapsed = &segments[..depth];
                let key = collapsed.join("/");
                if self.last_collapsed.as_deref() == Some(key.as_str()) {
                    return Ok(Flow::Continue);
                }
                self.write_leaf(&record.path, collapsed, "true", ValueKind::True)?;
                self.last_collapsed = Some(key);
            }
            _ => self.write_leaf(&record.path, &segments, &record.value, record.kind)?,
        }
        Ok(Flow::Continue)
    }

    /// Close every open container and the JSONP wrapper, then flush.
    ///
    /// Writes nothing if no record was accepted.
    pub fn finish(mut self) -> Result<W> {
        if self.started {
            while !self.frames.is_empty() {
                self.close_frame()?;
            }
            if self.callback.is_some() {
                self.writer.write_all(b")")?;
            }
        }
        self.writer.flush()?;
        Ok(self.writer)
    }

    fn write_leaf(
        &mut self,
        path: &str,
        segments: &[&str],
        value: &str,
        kind: ValueKind,
    ) -> Result<()> {
        if segments.is_empty() {
            if self.started {
                return Err(conflict(path));
            }
            self.start()?;
            return self.write_scalar(value, kind);
        }

        let mut common = 0;
        while common < self.frames.len()
            && common < segments.len()
            && self.frames[common].entry.as_deref() == Some(segments[common])
        {
            common += 1;
        }
        if common == segments.len() || (common > 0 && common == self.frames.len()) {
            // The slot is already a leaf, or already an open container
            return Err(conflict(path));
        }

        if self.frames.is_empty() {
            if self.started {
                return Err(conflict(path));
            }
            self.start()?;
            self.open_container(segments[0])?;
        }
        while self.frames.len() > common + 1 {
            self.close_frame()?;
        }

        let last = segments.len() - 1;
        for (level, segment) in segments.iter().enumerate().skip(common) {
            self.enter_slot(path, segment)?;
            if level < last {
                self.open_container(segments[level + 1])?;
            }
        }
        self.write_scalar(value, kind)?;
        self.end_slot()
    }

    fn start(&mut self) -> Result<()> {
        self.started = true;
        if let Some(name) = &self.callback {
            self.writer.write_all(name.as_bytes())?;
            self.writer.write_all(b"(")?;
        }
        Ok(())
    }

    /// Open the container whose first slot is `first_segment`.
    fn open_container(&mut self, first_segment: &str) -> Result<()> {
        let container = if is_index_segment(first_segment) {
            self.formatter.begin_array(&mut self.writer)?;
            if self.descending && self.frames.is_empty() {
                Container::ReversedArray { below: None }
            } else {
                Container::Array { next_index: 0 }
            }
        } else {
            self.formatter.begin_object(&mut self.writer)?;
            Container::Object
        };
        self.frames.push(Frame {
            container,
            entry: None,
        });
        Ok(())
    }

    fn close_frame(&mut self) -> Result<()> {
        if let Some(frame) = self.frames.pop() {
            match frame.container {
                Container::Object => self.formatter.end_object(&mut self.writer)?,
                Container::Array { .. } | Container::ReversedArray { .. } => {
                    self.formatter.end_array(&mut self.writer)?
                }
            }
            if !self.frames.is_empty() {
                self.end_slot()?;
            }
        }
        Ok(())
    }

    /// Open `segment` in the innermost frame.
    fn enter_slot(&mut self, path: &str, segment: &str) -> Result<()> {
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| Error::Corruption(format!("no open container for '{}'", path)))?;
        let first = frame.entry.is_none();

        match (&mut frame.container, is_index_segment(segment)) {
            (Container::Object, false) => {
                self.formatter.begin_object_key(&mut self.writer, first)?;
                serde_json::to_writer(&mut self.writer, segment)?;
                self.formatter.end_object_key(&mut self.writer)?;
                self.formatter.begin_object_value(&mut self.writer)?;
            }
            (Container::Array { next_index }, true) => {
                let index = decode_index(segment)?;
                if index < *next_index {
                    return Err(Error::Corruption(format!(
                        "array index {} out of order at '{}'",
                        index, path
                    )));
                }
                // Slots never written read back as null
                while *next_index < index {
                    self.formatter
                        .begin_array_value(&mut self.writer, *next_index == 0)?;
                    self.formatter.write_null(&mut self.writer)?;
                    self.formatter.end_array_value(&mut self.writer)?;
                    *next_index += 1;
                }
                self.formatter
                    .begin_array_value(&mut self.writer, *next_index == 0)?;
                *next_index = index + 1;
            }
            (Container::ReversedArray { below }, true) => {
                let index = decode_index(segment)?;
                if below.map_or(false, |b| index >= b) {
                    return Err(Error::Corruption(format!(
                        "array index {} out of order at '{}'",
                        index, path
                    )));
                }
                self.formatter
                    .begin_array_value(&mut self.writer, below.is_none())?;
                *below = Some(index);
            }
            _ => {
                return Err(Error::Corruption(format!(
                    "'{}' mixes array and object members",
                    path
                )))
            }
        }
        frame.entry = Some(segment.to_string());
        Ok(())
    }

    fn end_slot(&mut self) -> Result<()> {
        match self.frames.last().map(|f| &f.container) {
            Some(Container::Object) => self.formatter.end_object_value(&mut self.writer)?,
            Some(Container::Array { .. } | Container::ReversedArray { .. }) => {
                self.formatter.end_array_value(&mut self.writer)?
            }
            None => {}
        }
        Ok(())
    }

    fn write_scalar(&mut self, value: &str, kind: ValueKind) -> Result<()> {
        match kind {
            ValueKind::String => serde_json::to_writer(&mut self.writer, value)?,
            ValueKind::Number => self.formatter.write_number_str(&mut self.writer, value)?,
            ValueKind::True => self.formatter.write_bool(&mut self.writer, true)?,
            ValueKind::False => self.formatter.write_bool(&mut self.writer, false)?,
            ValueKind::Null => self.formatter.write_null(&mut self.writer)?,
        }
        Ok(())
    }
}

fn conflict(path: &str) -> Error {
    Error::Corruption(format!(
        "'{}' is stored both as a value and as a container",
        path
    ))
}

/// Drive a [`RecordWriter`] chosen by `options.pretty_print` from a record source.
///
/// `source` is handed a callback to call once per record, in path order, and
/// should stop early when it returns [`Flow::Stop`]. Returns whether any
/// output was written.
pub fn write_with<W, S>(base: &JsonPath, options: &GetOptions, writer: W, source: S) -> Result<bool>
where
    W: Write,
    S: FnOnce(&mut dyn FnMut(JsonRecord) -> Result<Flow>) -> Result<()>,
{
    if options.pretty_print {
        drive(RecordWriter::pretty(writer, base, options), source)
    } else {
        drive(RecordWriter::compact(writer, base, options), source)
    }
}

/// Write records from an iterator. Returns whether any output was written.
pub fn write_records<I, W>(records: I, base: &JsonPath, options: &GetOptions, writer: W) -> Result<bool>
where
    I: IntoIterator<Item = JsonRecord>,
    W: Write,
{
    write_with(base, options, writer, |emit| {
        for record in records {
            if emit(record)? == Flow::Stop {
                break;
            }
        }
        Ok(())
    })
}

fn drive<W, F, S>(mut out: RecordWriter<W, F>, source: S) -> Result<bool>
where
    W: Write,
    F: Formatter,
    S: FnOnce(&mut dyn FnMut(JsonRecord) -> Result<Flow>) -> Result<()>,
{
    source(&mut |record: JsonRecord| out.accept(&record))?;
    let wrote = out.has_output();
    out.finish()?;
    Ok(wrote)
}
