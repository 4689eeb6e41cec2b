// Logs module - File mirrors of captured process output

mod writer;

pub use writer::LogWriter;
