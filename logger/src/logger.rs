//! Channel-backed logger: callers never block on file IO, a single
//! background thread owns the sink.
use chrono;
use std::{
    fmt::{self, Display},
    fs::OpenOptions,
    io::Write,
    sync::mpsc::{Receiver, Sender, channel},
    thread::spawn,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARNING",
            LogLevel::Error => "ERROR",
        };
        write!(f, "{tag}")
    }
}

/// Struct to hold the logger sender
#[derive(Debug, Clone)]
pub struct Logger {
    /// Sender to send log messages
    pub logger: Sender<String>,
}

impl Logger {
    /// Spawns a background writer thread and returns a handle to it.
    /// `filename` is opened in append mode.
    pub fn new(filename: &str) -> Logger {
        let (logger, receiver) = channel();
        let filename = filename.to_string();

        spawn(move || {
            write_to_file(&filename, receiver);
        });

        Logger { logger }
    }

    /// Logger that discards every message; used by tests that don't assert on log output.
    pub fn null() -> Self {
        let (sender, receiver) = channel::<String>();
        spawn(move || for _ in receiver {});
        Self { logger: sender }
    }

    pub fn info(&self, message: &str, module: &str) {
        self.emit(LogLevel::Info, message, module);
    }

    pub fn error(&self, message: &str, module: &str) {
        self.emit(LogLevel::Error, message, module);
    }

    pub fn warn(&self, message: &str, module: &str) {
        self.emit(LogLevel::Warn, message, module);
    }

    /// Registers a debug line, appending any `Display`-able context value.
    pub fn debug<T: Display>(&self, message: &str, module: &str, data: T) {
        let log_message = self.format(LogLevel::Debug, module, &format!("{message} - {data}"));
        self.log(log_message.as_str());
    }

    fn emit(&self, level: LogLevel, message: &str, module: &str) {
        let log_message = self.format(level, module, message);
        self.log(log_message.as_str());
    }

    fn format(&self, level: LogLevel, module: &str, message: &str) -> String {
        let now = chrono::Local::now();
        let timestamp = now.format("%Y-%m-%d %H:%M:%S%.3f").to_string();
        format!("[{level}] - {timestamp} - {module}: {message}")
    }

    /// Envia un mensaje por el canal del logger
    fn log(&self, log_message: &str) {
        if self.logger.send(log_message.to_string()).is_err() {
            eprintln!("Error sending log message");
        }
    }
}

fn write_to_file(filename: &str, receiver: Receiver<String>) {
    let file = OpenOptions::new().create(true).append(true).open(filename);

    let mut file = match file {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Error opening log file: {e}");
            return;
        }
    };

    for message in receiver {
        if let Err(e) = writeln!(file, "{message}") {
            eprintln!("Error writing to log file: {e}");
        }
    }
}
