use anyhow::Context;
use doacore::prelude::{ArrayParams, Initializer, Method, OptimizerOptions, Window};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::generator::scene::SceneConfig;

/// One offline workflow: the synthetic scene plus the engine parameters.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub scene: SceneConfig,
    pub params: ArrayParams,
}

impl WorkflowConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading workflow config {}", path_ref.display()))?;
        let config: WorkflowConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing workflow config {}", path_ref.display()))?;
        Ok(config)
    }
}

/// Maps a CLI method name onto an engine method tag with its default
/// parameters. Unknown names fail here, before any scene is generated.
pub fn method_from_name(name: &str) -> anyhow::Result<Method> {
    let method = match name {
        "periodogram" => Method::Periodogram {
            window: Window::Hann,
        },
        "mvdr" => Method::Mvdr {
            diagonal_load: 1e-2,
        },
        "mvdr-robust" => Method::MvdrRobust {
            diagonal_load: 1e-2,
            mismatch_fraction: 0.1,
        },
        "music" => Method::Music,
        "risr" => Method::Risr {
            iterations: 10,
            diagonal_load: 1e-2,
        },
        "music-doa" => Method::MusicDoa {
            optimizer: OptimizerOptions::default(),
        },
        "mle" => Method::Mle {
            initializer: Initializer::GridSearch,
            optimizer: OptimizerOptions::default(),
            sequential: None,
        },
        "wideband-dcm" => Method::WidebandDcm {
            taps: 3,
            registration_support: 4,
            optimizer: OptimizerOptions::default(),
        },
        "wideband-mle" => Method::WidebandMle {
            subbands: 4,
            initializer: Initializer::GridSearch,
            optimizer: OptimizerOptions::default(),
        },
        // Kept so the legacy tag surfaces the engine's fatal error rather
        // than an argument-parsing one.
        "eig" => Method::Eig,
        other => anyhow::bail!("unknown method name: {}", other),
    };
    Ok(method)
}
