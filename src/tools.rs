use std::path::{Path, PathBuf};
use std::process::Command;

use camino::Utf8Path;
use serde::Serialize;

use crate::error::KiraError;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolInfo {
    pub prodigal: Option<String>,
    pub mmseqs: Option<String>,
}

/// ORF calling and marker homology search, run as external processes.
pub trait MarkerSearch: Send + Sync {
    /// Translates ORFs of every genome in `genomes` into the protein FASTA `orfs`.
    fn call_orfs(&self, genomes: &Utf8Path, orfs: &Utf8Path) -> Result<(), KiraError>;
    /// Searches `orfs` against `markers`, writing a tab-separated match table
    /// whose first two columns are query and target.
    fn search(
        &self,
        orfs: &Utf8Path,
        markers: &Utf8Path,
        matches: &Utf8Path,
        tmp_dir: &Utf8Path,
    ) -> Result<(), KiraError>;
    fn tool_info(&self) -> ToolInfo;
}

#[derive(Debug, Clone)]
pub enum ToolStatus {
    Ready,
    Missing { message: String },
}

#[derive(Clone)]
pub struct SystemMarkerSearch {
    prodigal: Option<PathBuf>,
    mmseqs: Option<PathBuf>,
    threads: usize,
}

impl SystemMarkerSearch {
    pub fn new(threads: usize) -> Self {
        Self {
            prodigal: find_in_path("prodigal"),
            mmseqs: find_in_path("mmseqs"),
            threads: threads.max(1),
        }
    }

    pub fn tool_status(&self) -> ToolStatus {
        if self.prodigal.is_none() {
            return ToolStatus::Missing {
                message: "missing prodigal (ORF caller)".to_string(),
            };
        }
        if self.mmseqs.is_none() {
            return ToolStatus::Missing {
                message: "missing mmseqs (MMseqs2 search)".to_string(),
            };
        }
        ToolStatus::Ready
    }

    fn require(tool: &Option<PathBuf>, name: &str) -> Result<PathBuf, KiraError> {
        tool.clone()
            .ok_or_else(|| KiraError::MissingTool(name.to_string()))
    }
}

impl MarkerSearch for SystemMarkerSearch {
    fn call_orfs(&self, genomes: &Utf8Path, orfs: &Utf8Path) -> Result<(), KiraError> {
        let prodigal = Self::require(&self.prodigal, "prodigal")?;
        let args = vec![
            "-i".to_string(),
            genomes.to_string(),
            "-a".to_string(),
            orfs.to_string(),
            "-p".to_string(),
            "meta".to_string(),
            "-q".to_string(),
        ];
        tracing::info!(input = %genomes, "calling ORFs");
        run_cmd(&prodigal, &args)
    }

    fn search(
        &self,
        orfs: &Utf8Path,
        markers: &Utf8Path,
        matches: &Utf8Path,
        tmp_dir: &Utf8Path,
    ) -> Result<(), KiraError> {
        let mmseqs = Self::require(&self.mmseqs, "mmseqs")?;
        let args = vec![
            "easy-search".to_string(),
            orfs.to_string(),
            markers.to_string(),
            matches.to_string(),
            tmp_dir.to_string(),
            "--threads".to_string(),
            self.threads.to_string(),
        ];
        tracing::info!(markers = %markers, "searching markers");
        run_cmd(&mmseqs, &args)
    }

    fn tool_info(&self) -> ToolInfo {
        ToolInfo {
            prodigal: self
                .prodigal
                .as_ref()
                .and_then(|path| tool_version(path, &["-v"])),
            mmseqs: self
                .mmseqs
                .as_ref()
                .and_then(|path| tool_version(path, &["version"])),
        }
    }
}

fn run_cmd(program: &Path, args: &[String]) -> Result<(), KiraError> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|err| KiraError::ToolFailed(format!("{}: {err}", program.display())))?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let message = if stderr.is_empty() {
        format!("command failed: {}", program.display())
    } else {
        stderr
    };
    Err(KiraError::ToolFailed(message))
}

pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.is_file() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.is_file() {
            return Some(plain);
        }
    }
    None
}

/// First non-empty line a tool prints for `args`. Prodigal reports its
/// version on stderr.
fn tool_version(path: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new(path).args(args).output().ok()?;
    [&output.stdout, &output.stderr]
        .into_iter()
        .map(|stream| String::from_utf8_lossy(stream).trim().to_string())
        .find(|text| !text.is_empty())
        .and_then(|text| text.lines().next().map(str::to_string))
}
