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

use std::path::PathBuf;

use clap::builder::ValueHint;
use clap_derive::Parser;

#[derive(Parser, Debug)]
pub struct Args {
    #[arg(
        value_name = "data-dir",
        help = "Directory to store all database files under",
        value_hint = ValueHint::DirPath,
        default_value = "./loom-data"
    )]
    pub data_dir: PathBuf,

    #[arg(
        long,
        value_name = "db",
        help = "World database directory name (relative to data-dir if not absolute)",
        value_hint = ValueHint::FilePath,
        default_value = "world.db"
    )]
    pub db: PathBuf,

    #[arg(
        long,
        value_name = "config",
        help = "Path to configuration (YAML or JSON) file to use, if any. If not specified, defaults are used.",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[arg(
        long,
        value_name = "rpc-listen",
        help = "RPC server address the portal sends requests to",
        default_value = "ipc:///tmp/loom_rpc.sock"
    )]
    pub rpc_listen: String,

    #[arg(
        long,
        value_name = "events-listen",
        help = "Events publisher listen address for portal-bound traffic",
        default_value = "ipc:///tmp/loom_events.sock"
    )]
    pub events_listen: String,

    #[arg(
        long,
        value_name = "num-io-threads",
        help = "Number of ZeroMQ IO threads to use",
        default_value = "2"
    )]
    pub num_io_threads: i32,

    #[arg(long, help = "Enable debug logging", default_value = "false")]
    pub debug: bool,
}

impl Args {
    /// Resolve the world database path relative to data_dir.
    pub fn resolved_db_path(&self) -> PathBuf {
        if self.db.is_absolute() {
            self.db.clone()
        } else {
            self.data_dir.join(&self.db)
        }
    }
}
