//! Nuitka-type ahead-of-time translator

use super::{arg_path, exe_name, linear_cost, BackendAdapter, InvocationSpec};
use crate::backend::{BackendId, TargetOs};
use crate::error::{BuildError, BuildResult};
use crate::process::ProcessSpec;
use crate::profile::ProjectProfile;
use crate::request::{file_stem, BuildRequest};
use crate::scorer::CostEstimate;
use std::path::PathBuf;

/// Drives `<python> -m nuitka`
#[derive(Debug, Clone)]
pub struct TranslatorAdapter {
    python: PathBuf,
    os: TargetOs,
}

impl TranslatorAdapter {
    pub fn new(python: impl Into<PathBuf>, os: TargetOs) -> Self {
        Self {
            python: python.into(),
            os,
        }
    }

    fn icon_flag(&self) -> Option<&'static str> {
        match self.os {
            TargetOs::Windows => Some("--windows-icon-from-ico="),
            TargetOs::Linux => Some("--linux-icon="),
            TargetOs::Macos => Some("--macos-app-icon="),
            TargetOs::Other => None,
        }
    }
}

impl BackendAdapter for TranslatorAdapter {
    fn id(&self) -> BackendId {
        BackendId::Translator
    }

    fn prepare(&self, request: &BuildRequest) -> BuildResult<InvocationSpec> {
        let options = &request.options;
        let name = request.output_name();
        let exe = exe_name(&name, self.os);
        let out = &request.output_dir;
        let mut warnings = Vec::new();

        let mut process = ProcessSpec::new(&self.python)
            .args(["-m", "nuitka"])
            .arg(if options.onefile { "--onefile" } else { "--standalone" });
        if options.windowed {
            process = process.arg("--windows-console-mode=disable");
        }
        if let Some(icon) = &options.icon {
            match self.icon_flag() {
                Some(flag) => process = process.arg(format!("{}{}", flag, arg_path(icon))),
                None if options.accept_option_loss => {
                    warnings.push(format!("dropped option 'icon': no icon support on {}", self.os));
                }
                None => return Err(BuildError::unsupported(self.id(), "icon")),
            }
        }
        process = process
            .arg(format!("--output-dir={}", arg_path(out)))
            .arg(format!("--output-filename={}", exe));
        for module in &options.excludes {
            process = process.arg(format!("--nofollow-import-to={}", module));
        }
        for module in &options.hidden_imports {
            process = process.arg(format!("--include-module={}", module));
        }
        for mapping in &options.extra_data {
            let flag = if mapping.source.is_dir() {
                "--include-data-dir"
            } else {
                "--include-data-files"
            };
            process = process.arg(format!(
                "{}={}={}",
                flag,
                arg_path(&mapping.source),
                mapping.dest
            ));
        }
        process = process
            .args([
                "--assume-yes-for-downloads",
                "--remove-output",
                "--no-progress-bar",
            ])
            .arg(arg_path(&request.entry_point));

        let expected_artifact = if options.onefile {
            out.join(&exe)
        } else {
            out.join(format!("{}.dist", file_stem(&request.entry_point)))
                .join(&exe)
        };

        Ok(InvocationSpec {
            process,
            expected_artifact,
            warnings,
        })
    }

    fn estimate_cost(&self, profile: &ProjectProfile) -> CostEstimate {
        linear_cost(profile, 60.0, 3.0, 6 * 1024 * 1024, 120 * 1024)
    }

    fn permanent_markers(&self) -> &'static [&'static str] {
        &["FATAL: Error, file", "is not a Python file"]
    }
}
