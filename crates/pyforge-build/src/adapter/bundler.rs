//! PyInstaller-type bundler

use super::{arg_path, exe_name, linear_cost, BackendAdapter, InvocationSpec};
use crate::backend::{BackendId, TargetOs};
use crate::error::BuildResult;
use crate::process::ProcessSpec;
use crate::profile::ProjectProfile;
use crate::request::BuildRequest;
use crate::scorer::CostEstimate;
use std::path::PathBuf;

/// Drives `pyinstaller`
#[derive(Debug, Clone)]
pub struct BundlerAdapter {
    executable: PathBuf,
    os: TargetOs,
}

impl BundlerAdapter {
    pub fn new(executable: impl Into<PathBuf>, os: TargetOs) -> Self {
        Self {
            executable: executable.into(),
            os,
        }
    }
}

impl BackendAdapter for BundlerAdapter {
    fn id(&self) -> BackendId {
        BackendId::Bundler
    }

    fn prepare(&self, request: &BuildRequest) -> BuildResult<InvocationSpec> {
        let options = &request.options;
        let name = request.output_name();
        let out = &request.output_dir;
        let work = out.join(".work");

        let mut process = ProcessSpec::new(&self.executable)
            .arg(if options.onefile { "--onefile" } else { "--onedir" })
            .arg(if options.windowed { "--windowed" } else { "--console" });
        if let Some(icon) = &options.icon {
            process = process.arg("--icon").arg(arg_path(icon));
        }
        process = process
            .arg("--name")
            .arg(&name)
            .arg("--distpath")
            .arg(arg_path(out))
            .arg("--workpath")
            .arg(arg_path(&work))
            .arg("--specpath")
            .arg(arg_path(&work))
            .arg("--noconfirm")
            .arg("--log-level=WARN");
        for module in &options.excludes {
            process = process.arg("--exclude-module").arg(module);
        }
        for module in &options.hidden_imports {
            process = process.arg("--hidden-import").arg(module);
        }
        let sep = self.os.data_separator();
        for mapping in &options.extra_data {
            process = process
                .arg("--add-data")
                .arg(format!("{}{}{}", arg_path(&mapping.source), sep, mapping.dest));
        }
        process = process.arg(arg_path(&request.entry_point));

        let exe = exe_name(&name, self.os);
        let expected_artifact = if options.onefile {
            out.join(exe)
        } else {
            out.join(&name).join(exe)
        };

        Ok(InvocationSpec {
            process,
            expected_artifact,
            warnings: Vec::new(),
        })
    }

    fn estimate_cost(&self, profile: &ProjectProfile) -> CostEstimate {
        linear_cost(profile, 20.0, 0.5, 8 * 1024 * 1024, 150 * 1024)
    }

    fn permanent_markers(&self) -> &'static [&'static str] {
        &["ERROR: Script file"]
    }
}
