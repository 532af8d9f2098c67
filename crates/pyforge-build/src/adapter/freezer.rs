//! cx_Freeze-type freezer
//!
//! Always produces a directory: `<out>/<name>/<name>[.exe]` next to the
//! frozen runtime. A single-file request is rejected unless option loss is
//! accepted.

use super::{arg_path, exe_name, linear_cost, BackendAdapter, InvocationSpec};
use crate::backend::{BackendId, TargetOs};
use crate::error::{BuildError, BuildResult};
use crate::process::ProcessSpec;
use crate::profile::ProjectProfile;
use crate::request::BuildRequest;
use crate::scorer::CostEstimate;
use std::path::PathBuf;

/// Drives `cxfreeze`
#[derive(Debug, Clone)]
pub struct FreezerAdapter {
    executable: PathBuf,
    os: TargetOs,
}

impl FreezerAdapter {
    pub fn new(executable: impl Into<PathBuf>, os: TargetOs) -> Self {
        Self {
            executable: executable.into(),
            os,
        }
    }
}

fn join_modules<'a>(modules: impl IntoIterator<Item = &'a String>) -> String {
    modules
        .into_iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

impl BackendAdapter for FreezerAdapter {
    fn id(&self) -> BackendId {
        BackendId::Freezer
    }

    fn prepare(&self, request: &BuildRequest) -> BuildResult<InvocationSpec> {
        let options = &request.options;
        let mut warnings = Vec::new();
        if options.onefile {
            if !options.accept_option_loss {
                return Err(BuildError::unsupported(self.id(), "onefile"));
            }
            warnings.push("dropped option 'onefile': output is a directory bundle".to_string());
        }

        let name = request.output_name();
        let target_dir = request.output_dir.join(&name);

        let mut process = ProcessSpec::new(&self.executable)
            .arg("--script")
            .arg(arg_path(&request.entry_point))
            .arg("--target-dir")
            .arg(arg_path(&target_dir))
            .arg("--target-name")
            .arg(&name);
        if options.windowed {
            process = process.arg("--base").arg("gui");
        }
        if let Some(icon) = &options.icon {
            process = process.arg("--icon").arg(arg_path(icon));
        }
        if !options.excludes.is_empty() {
            process = process.arg(format!("--excludes={}", join_modules(&options.excludes)));
        }
        if !options.hidden_imports.is_empty() {
            process = process.arg(format!(
                "--includes={}",
                join_modules(&options.hidden_imports)
            ));
        }
        if !options.extra_data.is_empty() {
            let files = options
                .extra_data
                .iter()
                .map(|m| format!("{}={}", arg_path(&m.source), m.dest))
                .collect::<Vec<_>>()
                .join(",");
            process = process.arg(format!("--include-files={}", files));
        }

        Ok(InvocationSpec {
            process,
            expected_artifact: target_dir.join(exe_name(&name, self.os)),
            warnings,
        })
    }

    fn estimate_cost(&self, profile: &ProjectProfile) -> CostEstimate {
        linear_cost(profile, 10.0, 0.3, 12 * 1024 * 1024, 200 * 1024)
    }
}
