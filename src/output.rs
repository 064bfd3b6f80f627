use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    AnnotateResult, DownloadResult, IngestResult, PmidsResult, ProgressEvent, ProgressSink,
    RunResult, TitlesResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

impl OutputMode {
    pub fn from_flag(non_interactive: bool) -> Self {
        if non_interactive {
            OutputMode::NonInteractive
        } else {
            OutputMode::Interactive
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_titles(result: &TitlesResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_pmids(result: &PmidsResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_annotate(result: &AnnotateResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_download(result: &DownloadResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_ingest(result: &IngestResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_run(result: &RunResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct ConsoleProgress;

impl ConsoleProgress {
    pub fn format_event(event: &ProgressEvent) -> String {
        match event.elapsed {
            Some(elapsed) => format!("{} ({} ms)", event.message, elapsed.as_millis()),
            None => event.message.clone(),
        }
    }
}

impl ProgressSink for ConsoleProgress {
    fn event(&self, event: ProgressEvent) {
        eprintln!("\x1b[36m{}\x1b[0m", Self::format_event(&event));
    }
}

pub fn sink_for(mode: OutputMode) -> Box<dyn ProgressSink> {
    match mode {
        OutputMode::Interactive => Box::new(ConsoleProgress),
        OutputMode::NonInteractive => Box::new(JsonOutput),
    }
}
