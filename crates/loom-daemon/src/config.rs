// Copyright (C) 2025 The loom authors. This program is free software: you can
// redistribute it and/or modify it under the terms of the GNU General Public
// License as published by the Free Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::collections::HashMap;
use std::path::Path;

use eyre::eyre;
use figment::providers::{Format as ProviderFormat, Json, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Game policy knobs, merged from defaults and an optional YAML or JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Sessions idle longer than this are disconnected. `None` disables the
    /// sweep.
    pub idle_timeout_seconds: Option<u64>,
    /// When false, logging a character in boots any other session already
    /// puppeting it.
    pub allow_multisession: bool,
    /// Dbref of the room orphaned objects and fresh characters land in. When
    /// unset, the first room in a fresh database is used.
    pub default_home: Option<i64>,
    /// Permission tokens ordered lowest to highest.
    pub permission_hierarchy: Vec<String>,
    /// Process-wide command alias table.
    pub aliases: HashMap<String, String>,
    /// Channels created at startup.
    pub channels: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            idle_timeout_seconds: None,
            allow_multisession: false,
            default_home: None,
            permission_hierarchy: vec![
                "Player".to_string(),
                "Builder".to_string(),
                "Admin".to_string(),
                "Developer".to_string(),
            ],
            aliases: HashMap::new(),
            channels: vec!["public".to_string()],
        }
    }
}

impl Config {
    /// Defaults overlaid with the file's values, when a file is given.
    pub fn load(config_path: Option<&Path>) -> Result<Self, eyre::Report> {
        let Some(config_path) = config_path else {
            return Ok(Self::default());
        };
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));
        figment = match config_path.extension().and_then(|e| e.to_str()) {
            Some("json") => figment.merge(Json::file(config_path)),
            _ => figment.merge(Yaml::file(config_path)),
        };
        figment
            .extract::<Self>()
            .map_err(|e| eyre!("Failed to parse configuration from {config_path:?}: {e}"))
    }
}
