/*
 *  main.rs
 *
 *  AddonHost - keep the host standing
 *  (c) 2020-26 Stuart Hunter
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use std::sync::Arc;

use anyhow::{Context, bail};
use env_logger::Env;
use log::{info, warn};

use addonhost::addon::{
    AddonDescriptor,
    AddonHost,
    AddonRuntime,
    AddonStatus,
    BridgeState,
    HostServices,
    InstanceData,
    InstanceType,
    MemorySettings,
};
use addonhost::config;

include!(concat!(env!("OUT_DIR"), "/build_info.rs"));

fn main() -> anyhow::Result<()> {
    let (cli, cfg) = config::load()?;

    env_logger::Builder::from_env(Env::default().default_filter_or(cfg.log_level()))
        .format_timestamp_secs()
        .init();

    info!("{} keeps the host standing", env!("CARGO_PKG_NAME"));
    info!("v.{} built {}", env!("CARGO_PKG_VERSION"), BUILD_DATE);

    let addon_file = cli
        .addon
        .as_ref()
        .context("--addon <addon.yaml> is required")?;
    let mut descriptor = AddonDescriptor::from_yaml_file(addon_file)
        .with_context(|| format!("reading {}", addon_file.display()))?;
    if descriptor.profile_path.as_os_str().is_empty() {
        descriptor.profile_path = cfg.user_data_dir(&descriptor.id);
    }
    let descriptor = Arc::new(descriptor);

    let instance_type: InstanceType = cli.instance_type.parse().map_err(anyhow::Error::msg)?;
    if !instance_type.is_global() && !descriptor.provides(instance_type) {
        warn!("{} does not declare {}", descriptor.id, instance_type);
    }

    let mut services = HostServices::new(cfg.search_paths());
    if let Some(path) = cfg.settings_file.as_ref() {
        let settings = MemorySettings::from_yaml_file(path)
            .with_context(|| format!("reading settings {}", path.display()))?;
        services = services.with_settings(Arc::new(settings));
    }
    let host = AddonHost::new(services);

    let status = if cli.child {
        let child = host.spawn_child(Arc::clone(&descriptor));
        exercise(&child, instance_type, &cli.instance_id, cli.transfer_settings)
    } else {
        let runtime = host.runtime(Arc::clone(&descriptor));
        exercise(&runtime, instance_type, &cli.instance_id, cli.transfer_settings)
    };

    host.shutdown();

    if status != AddonStatus::Ok {
        bail!("{} finished with status: {}", descriptor.id, status);
    }
    info!("{} finished cleanly", descriptor.id);
    Ok(())
}

/// Create, query and tear down one addon (or one instance of it)
fn exercise(
    runtime: &AddonRuntime,
    instance_type: InstanceType,
    instance_id: &str,
    transfer_settings: bool,
) -> AddonStatus {
    let status = if instance_type.is_global() {
        runtime.create(instance_type)
    } else {
        runtime.create_instance(instance_type, instance_id, InstanceData::null())
    };
    info!("{} create: {}", runtime.descriptor().id, status);
    if status != AddonStatus::Ok {
        runtime.destroy();
        return status;
    }

    match runtime.get_status() {
        Ok(s) => info!("{} reports status: {}", runtime.descriptor().id, s),
        Err(e) => warn!("{} status query failed: {}", runtime.descriptor().id, e),
    }

    let mut status = AddonStatus::Ok;
    if transfer_settings {
        status = runtime.transfer_settings();
        info!("{} settings transfer: {}", runtime.descriptor().id, status);
    }

    if instance_type.is_global() {
        runtime.destroy();
    } else {
        runtime.destroy_instance(instance_id);
    }

    // a fault during the run leaves the bridge tripped
    if runtime.bridge_state() == BridgeState::Tripped {
        return AddonStatus::PermanentFailure;
    }
    status
}
