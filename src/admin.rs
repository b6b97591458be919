//! Override administration operations.
//!
//! Each operation follows the same shape: select a record from the
//! merged registry, validate the proposed change, mutate the override
//! map, atomic save. Prompts run over injected streams so the whole flow
//! is testable without a terminal.

use crate::names;
use crate::overrides::{OverrideEntry, OverrideStore, StoreError};
use crate::prompt;
use crate::registry::{self, DeviceRecord};
use serde_json::json;
use std::io::{self, BufRead, Write};
use thiserror::Error;

/// Errors from admin operations. User cancellation is not an error.
#[derive(Error, Debug)]
pub enum AdminError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Pretty-print the device list with override markers.
pub fn show_device_list(devices: &[DeviceRecord], out: &mut impl Write) -> io::Result<()> {
    if devices.is_empty() {
        writeln!(out, "No devices found.")?;
        return Ok(());
    }

    writeln!(out, "\nDevices:")?;
    writeln!(out, "{}", "=".repeat(80))?;
    for (i, device) in devices.iter().enumerate() {
        let marker = if device.has_override { " [OVERRIDE]" } else { "" };
        writeln!(
            out,
            "[{}] MAC: {} | Name: {} | Room: {} | SKU: {}{marker}",
            i + 1,
            device.mac,
            device.name,
            device.room,
            device.sku,
        )?;
    }
    writeln!(out, "{}", "=".repeat(80))?;
    writeln!(out)?;
    Ok(())
}

/// Display a numbered list and let the user pick a record.
pub fn select_device<'a>(
    devices: &'a [DeviceRecord],
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> io::Result<Option<&'a DeviceRecord>> {
    if devices.is_empty() {
        writeln!(out, "No devices available.")?;
        return Ok(None);
    }
    show_device_list(devices, out)?;
    writeln!(out, "[0] Cancel")?;
    Ok(
        prompt::select_index(input, out, "\nSelect device number: ", devices.len())?
            .map(|i| &devices[i]),
    )
}

/// `list`: device table plus override summary counts.
pub fn list(devices: &[DeviceRecord], out: &mut impl Write) -> io::Result<()> {
    show_device_list(devices, out)?;
    let override_count = devices.iter().filter(|d| d.has_override).count();
    writeln!(out, "Total devices: {}", devices.len())?;
    writeln!(out, "Overrides: {override_count}")?;
    Ok(())
}

fn print_device_header(device: &DeviceRecord, action: &str, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "\n{action}:")?;
    writeln!(out, "  MAC: {}", device.mac)?;
    writeln!(out, "  Current name: {}", device.name)?;
    writeln!(out, "  Current room: {}", device.room)?;
    writeln!(out, "  SKU: {}", device.sku)?;
    writeln!(out)?;
    Ok(())
}

/// `rename`: validated name change with optional room change.
/// Returns `true` when an override was saved.
pub fn rename(
    device: &DeviceRecord,
    all_devices: &[DeviceRecord],
    store: &OverrideStore,
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> Result<bool, AdminError> {
    print_device_header(device, "Renaming device", out)?;

    let new_name = loop {
        let candidate =
            match prompt::prompt_cancellable(input, out, "Enter new name (or 'cancel' to abort): ")?
            {
                Some(name) => name,
                None => {
                    writeln!(out, "Cancelled")?;
                    return Ok(false);
                }
            };
        match names::validate_name(&candidate, all_devices, Some(device.mac.as_str())) {
            Ok(()) => break candidate,
            Err(e) => writeln!(out, "Rejected: {e}")?,
        }
    };

    let room_prompt = format!("\nAlso change room? Current: '{}' [y/N]: ", device.room);
    let new_room = if prompt::confirm(input, out, &room_prompt)? {
        prompt::prompt(input, out, "Enter new room name: ")?
            .map(|r| registry::normalize_label(&r))
            .filter(|r| !r.is_empty())
    } else {
        None
    };

    let mut overrides = store.load()?;
    let entry = overrides.entry(device.mac.clone()).or_default();
    entry.name = Some(new_name.clone());
    if let Some(room) = &new_room {
        entry.room = Some(room.clone());
    }
    // keep the SKU so the decoder still works when the API is offline
    if device.sku != "unknown" {
        entry.sku = Some(device.sku.clone());
    }
    store.save(&overrides)?;

    writeln!(out, "\nOverride saved: {} -> {new_name}", device.name)?;
    if let Some(room) = new_room {
        writeln!(out, "Room updated: {} -> {room}", device.room)?;
    }
    Ok(true)
}

/// `set-room`: room change only, preserving any existing name override.
pub fn set_room(
    device: &DeviceRecord,
    store: &OverrideStore,
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> Result<bool, AdminError> {
    print_device_header(device, "Changing room for device", out)?;

    let new_room = match prompt::prompt_cancellable(
        input,
        out,
        "Enter new room name (or 'cancel' to abort): ",
    )? {
        Some(room) => registry::normalize_label(&room),
        None => {
            writeln!(out, "Cancelled")?;
            return Ok(false);
        }
    };

    let mut overrides = store.load()?;
    let entry = overrides.entry(device.mac.clone()).or_default();
    entry.room = Some(new_room.clone());
    if device.has_override && entry.name.is_none() {
        entry.name = Some(device.name.clone());
    }
    store.save(&overrides)?;

    writeln!(out, "\nRoom updated: {} -> {new_room}", device.room)?;
    Ok(true)
}

/// `clear-override`: drop the local override, reverting to remote values.
pub fn clear_override(
    device: &DeviceRecord,
    store: &OverrideStore,
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> Result<bool, AdminError> {
    if !device.has_override {
        writeln!(out, "\nDevice '{}' has no override to clear.", device.name)?;
        return Ok(false);
    }

    print_device_header(device, "Clearing override for device", out)?;
    if !prompt::confirm(
        input,
        out,
        "Are you sure? This will revert to API name/room [y/N]: ",
    )? {
        writeln!(out, "Cancelled")?;
        return Ok(false);
    }

    let mut overrides = store.load()?;
    overrides.remove(&device.mac);
    store.save(&overrides)?;

    writeln!(out, "\nOverride cleared for {}", device.name)?;
    Ok(true)
}

/// `check-bad`: one JSON line per suspect device, for shell pipelines.
pub fn check_bad(devices: &[DeviceRecord], out: &mut impl Write) -> Result<usize, AdminError> {
    let bad = names::detect_bad_names(devices);
    for device in &bad {
        writeln!(out, "{}", serde_json::to_string(device)?)?;
    }
    Ok(bad.len())
}

fn colonize(mac: &str) -> String {
    let chars: Vec<char> = mac.chars().collect();
    chars
        .chunks(2)
        .map(|pair| pair.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(":")
}

/// `merge`: the merged registry in remote-API shape, as one JSON array
/// on stdout for consumption by shell scripts.
pub fn merge_json(devices: &[DeviceRecord], out: &mut impl Write) -> Result<(), AdminError> {
    let output: Vec<_> = devices
        .iter()
        .map(|d| {
            json!({
                "id": colonize(d.mac.as_str()),
                "name": d.name,
                "room": d.room,
                "sku": d.sku,
            })
        })
        .collect();
    writeln!(out, "{}", serde_json::to_string(&output)?)?;
    Ok(())
}
