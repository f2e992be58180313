use anyhow::anyhow;
use formatx::formatx;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::fmt::Debug;
use std::fs::File;
use std::io;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

/// Where report streams are written, keyed by a short location key such as `eso` or `mtr`.
pub trait Output: Debug {
    fn writer_for_location_key(&self, location_key: &str) -> anyhow::Result<impl Write>;
    /// Whether this output can be considered a no-op and therefore that any code that only writes to the output can be skipped.
    fn is_noop(&self) -> bool {
        false
    }
}

#[derive(Debug)]
pub struct FileOutput {
    directory_path: PathBuf,
    file_template: String,
}

impl FileOutput {
    /// `file_template` has a single `{}` placeholder that is filled with the location key.
    pub fn new(directory_path: PathBuf, file_template: String) -> Self {
        Self {
            directory_path,
            file_template,
        }
    }
}

impl Output for FileOutput {
    fn writer_for_location_key(&self, location_key: &str) -> anyhow::Result<impl Write> {
        let file_name = formatx!(&self.file_template, location_key)
            .map_err(|err| anyhow!("Invalid output file template: {err:?}"))?;
        Ok(BufWriter::new(File::create(
            self.directory_path.join(file_name),
        )?))
    }
}

impl<O: Output> Output for &O {
    fn writer_for_location_key(&self, location_key: &str) -> anyhow::Result<impl Write> {
        (**self).writer_for_location_key(location_key)
    }

    fn is_noop(&self) -> bool {
        (**self).is_noop()
    }
}

/// An output that goes to nowhere/ a "sink"/ /dev/null.
#[derive(Debug, Default)]
pub struct SinkOutput;

impl Output for SinkOutput {
    fn writer_for_location_key(&self, _location_key: &str) -> anyhow::Result<impl Write> {
        Ok(io::sink())
    }

    fn is_noop(&self) -> bool {
        true
    }
}

/// Keeps everything written in memory, for tests and for callers that post-process the streams.
#[derive(Debug, Default)]
pub struct MemoryOutput {
    buffers: Mutex<IndexMap<String, Vec<u8>>>,
}

impl MemoryOutput {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn contents(&self, location_key: &str) -> Option<String> {
        self.buffers
            .lock()
            .get(location_key)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn location_keys(&self) -> Vec<String> {
        self.buffers.lock().keys().cloned().collect()
    }
}

impl Output for MemoryOutput {
    fn writer_for_location_key(&self, location_key: &str) -> anyhow::Result<impl Write> {
        self.buffers
            .lock()
            .insert(location_key.to_string(), Vec::new());
        Ok(MemoryWriter {
            output: self,
            location_key: location_key.to_string(),
        })
    }
}

struct MemoryWriter<'a> {
    output: &'a MemoryOutput,
    location_key: String,
}

impl Write for MemoryWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output
            .buffers
            .lock()
            .entry(self.location_key.clone())
            .or_default()
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
