use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use env_logger::{Builder, Env, Target};

/// Initialises `env_logger` (`RUST_LOG`, default `info`), optionally
/// duplicating every record into `log_file`.
pub fn init(log_file: Option<&Path>) -> io::Result<()> {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    if let Some(path) = log_file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(Target::Pipe(Box::new(Tee { file })));
    }
    builder.init();
    Ok(())
}

/// Writes to stderr and a file.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}
