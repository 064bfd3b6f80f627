use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::info;

use crate::config::OntogptSettings;
use crate::domain::Pmid;
use crate::error::CellError;
use crate::process::{failure_message, find_in_path, require_tool, run_capture};

pub trait AnnotationProcess: Send + Sync {
    fn annotate(&self, pmid: &Pmid, output: &Path) -> Result<(), CellError>;
}

#[derive(Clone)]
pub struct OntogptProcess {
    program: Option<PathBuf>,
    program_name: String,
    template: String,
}

impl OntogptProcess {
    pub fn new(settings: &OntogptSettings) -> Self {
        Self {
            program: find_in_path(&settings.program),
            program_name: settings.program.clone(),
            template: settings.template.clone(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.program.is_some()
    }

    pub fn arguments(&self, pmid: &Pmid, output: &Path) -> Vec<String> {
        vec![
            "pubmed-annotate".to_string(),
            "--template".to_string(),
            self.template.clone(),
            pmid.as_str().to_string(),
            "--limit".to_string(),
            "1".to_string(),
            "--output".to_string(),
            output.to_string_lossy().to_string(),
        ]
    }
}

impl AnnotationProcess for OntogptProcess {
    fn annotate(&self, pmid: &Pmid, output: &Path) -> Result<(), CellError> {
        let program = require_tool(self.program.as_ref(), &self.program_name)?;
        let args = self.arguments(pmid, output);
        let result = run_capture(&program, &args).map_err(|err| CellError::AnnotationFailed {
            pmid: pmid.to_string(),
            message: err.to_string(),
        })?;
        if result.status.success() {
            return Ok(());
        }
        Err(CellError::AnnotationFailed {
            pmid: pmid.to_string(),
            message: failure_message(&program, &result),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AnnotationOutcome {
    NoIdentifier,
    Cached { path: Utf8PathBuf },
    Annotated { path: Utf8PathBuf },
}

pub struct AnnotationGate<P: AnnotationProcess> {
    process: P,
    output_dir: Utf8PathBuf,
}

impl<P: AnnotationProcess> AnnotationGate<P> {
    pub fn new(process: P, output_dir: Utf8PathBuf) -> Self {
        Self {
            process,
            output_dir,
        }
    }

    pub fn output_dir(&self) -> &Utf8Path {
        &self.output_dir
    }

    pub fn artifact_path(&self, pmid: &Pmid) -> Utf8PathBuf {
        self.output_dir.join(format!("{pmid}.out"))
    }

    pub fn ensure_annotation(&self, pmid: Option<&Pmid>) -> Result<AnnotationOutcome, CellError> {
        let Some(pmid) = pmid else {
            return Ok(AnnotationOutcome::NoIdentifier);
        };
        let path = self.artifact_path(pmid);
        if path.as_std_path().exists() {
            info!(pmid = %pmid, path = %path, "annotation output exists");
            return Ok(AnnotationOutcome::Cached { path });
        }

        std::fs::create_dir_all(self.output_dir.as_std_path())
            .map_err(|err| CellError::Filesystem(err.to_string()))?;
        info!(pmid = %pmid, "running annotation");
        self.process.annotate(pmid, path.as_std_path())?;
        info!(pmid = %pmid, path = %path, "completed annotation");
        Ok(AnnotationOutcome::Annotated { path })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ontogpt_arguments_follow_cli_contract() {
        let process = OntogptProcess::new(&OntogptSettings {
            program: "ontogpt".to_string(),
            template: "cell_type".to_string(),
        });
        let pmid: Pmid = "38540357".parse().unwrap();
        let args = process.arguments(&pmid, Path::new("ontogpt/38540357.out"));
        assert_eq!(
            args,
            vec![
                "pubmed-annotate",
                "--template",
                "cell_type",
                "38540357",
                "--limit",
                "1",
                "--output",
                "ontogpt/38540357.out",
            ]
        );
    }

    #[test]
    fn missing_identifier_is_a_no_op() {
        let process = OntogptProcess::new(&OntogptSettings {
            program: "definitely-not-installed-ontogpt".to_string(),
            template: "cell_type".to_string(),
        });
        let gate = AnnotationGate::new(process, Utf8PathBuf::from("unused"));
        assert_eq!(
            gate.ensure_annotation(None).unwrap(),
            AnnotationOutcome::NoIdentifier
        );
    }
}
