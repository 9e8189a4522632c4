//! Dependency remediation.
//!
//! When a command reports that a toolchain is missing, the remediator looks
//! the toolchain up in a fixed per-OS catalog, probes for it, and (with the
//! user's consent) runs the catalog's install command. The catalog is never
//! extended from model output.

use crate::ports::{ConfirmationPort, ToolchainPort, WorkspaceObserver};
use crate::types::{Transcript, TranscriptKind};
use tracing::{info, warn};

/// One catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolchainSpec {
    pub name: &'static str,
    /// Side-effect-free presence check.
    pub probe: &'static str,
    pub install: &'static str,
}

/// Toolchain names in detection order.
pub const TOOLCHAINS: &[&str] = &["python", "node", "npm", "pip"];

#[cfg(target_os = "macos")]
const CATALOG: &[ToolchainSpec] = &[
    ToolchainSpec {
        name: "python",
        probe: "python3 --version",
        install: "brew install python",
    },
    ToolchainSpec {
        name: "node",
        probe: "node --version",
        install: "brew install node",
    },
    ToolchainSpec {
        name: "npm",
        probe: "npm --version",
        install: "brew install node",
    },
    ToolchainSpec {
        name: "pip",
        probe: "python3 -m pip --version",
        install: "python3 -m ensurepip --upgrade",
    },
];

#[cfg(target_os = "windows")]
const CATALOG: &[ToolchainSpec] = &[
    ToolchainSpec {
        name: "python",
        probe: "python --version",
        install: "winget install -e --id Python.Python.3.12",
    },
    ToolchainSpec {
        name: "node",
        probe: "node --version",
        install: "winget install -e --id OpenJS.NodeJS",
    },
    ToolchainSpec {
        name: "npm",
        probe: "npm --version",
        install: "winget install -e --id OpenJS.NodeJS",
    },
    ToolchainSpec {
        name: "pip",
        probe: "python -m pip --version",
        install: "python -m ensurepip --upgrade",
    },
];

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const CATALOG: &[ToolchainSpec] = &[
    ToolchainSpec {
        name: "python",
        probe: "python3 --version",
        install: "sudo apt-get install -y python3",
    },
    ToolchainSpec {
        name: "node",
        probe: "node --version",
        install: "sudo apt-get install -y nodejs npm",
    },
    ToolchainSpec {
        name: "npm",
        probe: "npm --version",
        install: "sudo apt-get install -y nodejs npm",
    },
    ToolchainSpec {
        name: "pip",
        probe: "python3 -m pip --version",
        install: "sudo apt-get install -y python3-pip",
    },
];

/// Look up the catalog entry for `name` on this OS.
pub fn catalog_entry(name: &str) -> Option<&'static ToolchainSpec> {
    CATALOG.iter().find(|entry| entry.name == name)
}

/// Scan command output for a "tool not found" signature.
///
/// A line matches when, lowercased, it names a catalog toolchain and says
/// `not found` or `not recognized`. Returns the first toolchain matched.
pub fn detect_missing_toolchain(output: &str) -> Option<&'static str> {
    output.lines().find_map(|line| {
        let line = line.to_lowercase();
        if !(line.contains("not found") || line.contains("not recognized")) {
            return None;
        }
        TOOLCHAINS.iter().copied().find(|tool| line.contains(tool))
    })
}

/// How a remediation attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemediationOutcome {
    /// The probe found the toolchain; nothing was installed.
    AlreadyPresent,
    Installed,
    Declined,
    Failed,
    /// No catalog entry for the name.
    Unknown,
}

impl RemediationOutcome {
    /// Whether the original command is worth retrying.
    pub fn is_ready(&self) -> bool {
        matches!(
            self,
            RemediationOutcome::AlreadyPresent | RemediationOutcome::Installed
        )
    }
}

/// Drives probe, confirm, install for one toolchain.
///
/// Each transcript line reaches the observer as soon as it is appended, so the
/// install command shows up before it runs. The install's own output arrives in
/// one batch once the installer exits.
pub struct Remediator<'a> {
    toolchain: &'a dyn ToolchainPort,
    confirm: &'a dyn ConfirmationPort,
    observer: Option<&'a dyn WorkspaceObserver>,
}

impl<'a> Remediator<'a> {
    pub fn new(toolchain: &'a dyn ToolchainPort, confirm: &'a dyn ConfirmationPort) -> Self {
        Self {
            toolchain,
            confirm,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: &'a dyn WorkspaceObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Make sure `name` is installed. Never raises; declines and failures return `false`.
    pub async fn ensure(&self, name: &str, transcript: &mut Transcript) -> bool {
        self.remediate(name, transcript).await.is_ready()
    }

    pub async fn remediate(&self, name: &str, transcript: &mut Transcript) -> RemediationOutcome {
        let Some(entry) = catalog_entry(name) else {
            self.note(
                transcript,
                TranscriptKind::Error,
                format!("No installer known for '{}'", name),
            )
            .await;
            return RemediationOutcome::Unknown;
        };

        if self.toolchain.is_present(entry.name, entry.probe).await {
            info!(toolchain = entry.name, "Toolchain already present");
            self.note(
                transcript,
                TranscriptKind::Output,
                format!("{} is already installed", entry.name),
            )
            .await;
            return RemediationOutcome::AlreadyPresent;
        }

        let question = format!(
            "'{}' appears to be missing. Install it by running `{}`?",
            entry.name, entry.install
        );
        if !self.confirm.confirm(&question).await {
            warn!(toolchain = entry.name, "Install declined");
            self.note(
                transcript,
                TranscriptKind::Output,
                format!("Skipped installing {}", entry.name),
            )
            .await;
            return RemediationOutcome::Declined;
        }

        self.note(transcript, TranscriptKind::Input, entry.install).await;
        match self.toolchain.install(entry.name, entry.install).await {
            Ok(out) => {
                for line in out.stdout.lines().filter(|l| !l.trim().is_empty()) {
                    self.note(transcript, TranscriptKind::Output, line).await;
                }
                for line in out.stderr.lines().filter(|l| !l.trim().is_empty()) {
                    self.note(transcript, TranscriptKind::Error, line).await;
                }
                if out.success {
                    info!(toolchain = entry.name, "Toolchain installed");
                    self.note(
                        transcript,
                        TranscriptKind::Output,
                        format!("Installed {}", entry.name),
                    )
                    .await;
                    RemediationOutcome::Installed
                } else {
                    warn!(toolchain = entry.name, exit_code = out.exit_code, "Install failed");
                    self.note(
                        transcript,
                        TranscriptKind::Error,
                        format!(
                            "Installing {} failed (exit code {})",
                            entry.name, out.exit_code
                        ),
                    )
                    .await;
                    RemediationOutcome::Failed
                }
            }
            Err(e) => {
                warn!(toolchain = entry.name, error = %e, "Install could not run");
                self.note(
                    transcript,
                    TranscriptKind::Error,
                    format!("Installing {} failed: {}", entry.name, e),
                )
                .await;
                RemediationOutcome::Failed
            }
        }
    }

    async fn note(
        &self,
        transcript: &mut Transcript,
        kind: TranscriptKind,
        text: impl Into<String>,
    ) {
        let line = transcript.push(kind, text);
        if let Some(observer) = self.observer {
            observer.on_transcript_line(line).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeToolchain, RecordingObserver, ScriptedConfirm};
    use crate::types::CommandOutput;

    #[test]
    fn test_detect_missing_toolchain() {
        assert_eq!(
            detect_missing_toolchain("sh: 1: python: not found"),
            Some("python")
        );
        assert_eq!(
            detect_missing_toolchain("bash: npm: command not found"),
            Some("npm")
        );
        assert_eq!(
            detect_missing_toolchain(
                "'node' is not recognized as an internal or external command"
            ),
            Some("node")
        );
        assert_eq!(
            detect_missing_toolchain("all good\nPIP3: NOT FOUND"),
            Some("pip")
        );
    }

    #[test]
    fn test_detect_requires_both_parts_on_one_line() {
        assert_eq!(detect_missing_toolchain("python 3.12 ready"), None);
        assert_eq!(detect_missing_toolchain("file not found"), None);
        assert_eq!(detect_missing_toolchain("python\nnot found"), None);
        assert_eq!(detect_missing_toolchain(""), None);
    }

    #[test]
    fn test_catalog_covers_detected_tools() {
        for tool in TOOLCHAINS {
            let entry = catalog_entry(tool).unwrap();
            assert!(!entry.probe.is_empty());
            assert!(!entry.install.is_empty());
        }
        assert!(catalog_entry("ruby").is_none());
    }

    #[tokio::test]
    async fn test_already_present_skips_install() {
        let toolchain = FakeToolchain::new().with_present("python");
        let confirm = ScriptedConfirm::always(true);
        let mut t = Transcript::new();
        let outcome = Remediator::new(&toolchain, &confirm)
            .remediate("python", &mut t)
            .await;
        assert_eq!(outcome, RemediationOutcome::AlreadyPresent);
        assert!(toolchain.installs().is_empty());
        assert!(confirm.questions().is_empty());
    }

    #[tokio::test]
    async fn test_install_accepted() {
        let toolchain = FakeToolchain::new().with_install_result(CommandOutput::ok("done"));
        let confirm = ScriptedConfirm::always(true);
        let mut t = Transcript::new();
        assert!(Remediator::new(&toolchain, &confirm).ensure("node", &mut t).await);

        let entry = catalog_entry("node").unwrap();
        assert_eq!(toolchain.installs(), vec![entry.install.to_string()]);
        assert!(confirm.questions()[0].contains(entry.install));
        assert!(t.contains(TranscriptKind::Input, entry.install));
        assert!(t.contains(TranscriptKind::Output, "done"));
    }

    #[tokio::test]
    async fn test_observer_sees_install_lines_in_order() {
        let toolchain = FakeToolchain::new().with_install_result(CommandOutput::ok("fetched"));
        let confirm = ScriptedConfirm::always(true);
        let observer = RecordingObserver::new();
        let mut t = Transcript::new();
        Remediator::new(&toolchain, &confirm)
            .with_observer(&observer)
            .ensure("python", &mut t)
            .await;

        let seen: Vec<(TranscriptKind, String)> = observer
            .lines()
            .into_iter()
            .map(|l| (l.kind, l.text))
            .collect();
        let install = catalog_entry("python").unwrap().install.to_string();
        assert_eq!(seen[0], (TranscriptKind::Input, install));
        assert_eq!(seen[1], (TranscriptKind::Output, "fetched".to_string()));
        assert_eq!(seen.len(), t.len());
    }

    #[tokio::test]
    async fn test_install_declined() {
        let toolchain = FakeToolchain::new();
        let confirm = ScriptedConfirm::always(false);
        let mut t = Transcript::new();
        let outcome = Remediator::new(&toolchain, &confirm)
            .remediate("pip", &mut t)
            .await;
        assert_eq!(outcome, RemediationOutcome::Declined);
        assert!(toolchain.installs().is_empty());
    }

    #[tokio::test]
    async fn test_install_failure_returns_false() {
        let toolchain =
            FakeToolchain::new().with_install_result(CommandOutput::failed(100, "E: no package"));
        let confirm = ScriptedConfirm::always(true);
        let mut t = Transcript::new();
        assert!(!Remediator::new(&toolchain, &confirm).ensure("npm", &mut t).await);
        assert!(t.contains(TranscriptKind::Error, "E: no package"));
        assert!(t.contains(TranscriptKind::Error, "exit code 100"));
    }

    #[tokio::test]
    async fn test_unknown_toolchain() {
        let toolchain = FakeToolchain::new();
        let confirm = ScriptedConfirm::always(true);
        let mut t = Transcript::new();
        let outcome = Remediator::new(&toolchain, &confirm)
            .remediate("cobol", &mut t)
            .await;
        assert_eq!(outcome, RemediationOutcome::Unknown);
        assert!(confirm.questions().is_empty());
    }
}
