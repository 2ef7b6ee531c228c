use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::json;

use super::Relay;
use crate::engine::{ApiValue, Device, Script};
use crate::hook::{HookArgs, PendingHook};
use crate::ptr::{self, hex_ptr};
use crate::range::{HookPatch, RangeInfo, RangeSource};
use crate::{Error, Result};

/// Largest buffer requested by a single `readBytes` call.
pub const READ_CHUNK_SIZE: u64 = 1024 * 1024;

/// Hex byte pattern, with `??` wildcards.
static SCAN_PATTERN: LazyLock<core::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^(?:[0-9a-fA-F]{2}|\?\?)+$"));

impl<D: Device> Relay<D> {
    /// Requests a native hook on the address the given input evaluates to.
    ///
    /// The hook is registered once the payload acknowledges it. Returns
    /// `None` if the input doesn't evaluate to a pointer, or if the payload
    /// rejects the request.
    #[tracing::instrument(name = "HookNative", skip(self, args))]
    pub async fn hook_native(
        &mut self,
        input: &str,
        args: Option<HookArgs>,
    ) -> Option<PendingHook> {
        let ptr = self
            .dwarf_api("evaluatePtr", vec![json!(input)], 0)
            .await
            .as_ref()
            .and_then(ApiValue::as_json)
            .and_then(ptr::parse_ptr_value)
            .unwrap_or_default();

        if ptr == 0 {
            tracing::debug!("not a pointer");
            return None;
        }

        let token = self.hooks.stage_native(ptr, input, args);
        let reply = self.dwarf_api("hookNative", vec![json!(hex_ptr(ptr))], 0).await;
        if reply.is_none() {
            self.hooks.cancel_pending(token);
            return None;
        }

        Some(token)
    }

    /// Requests a java hook on a class or method.
    ///
    /// Whitespace is stripped from the input. Returns `None` if the payload
    /// rejects the request.
    #[tracing::instrument(name = "HookJava", skip(self, args))]
    pub async fn hook_java(&mut self, input: &str, args: Option<HookArgs>) -> Option<PendingHook> {
        let input: String = input.chars().filter(|c| !c.is_whitespace()).collect();
        if input.is_empty() {
            return None;
        }

        let token = self.hooks.stage_java(input.clone(), args);
        let reply = self.dwarf_api("hookJava", vec![json!(input)], 0).await;
        if reply.is_none() {
            self.hooks.cancel_pending(token);
            return None;
        }

        Some(token)
    }

    /// Requests a hook triggered when the given module is loaded.
    ///
    /// Returns whether a request was issued.
    pub async fn hook_native_on_load(&mut self, module: &str) -> bool {
        if module.is_empty() || self.hooks.native_on_load().contains_key(module) {
            return false;
        }

        self.dwarf_api("hookNativeOnLoad", vec![json!(module)], 0).await;
        true
    }

    /// Requests a hook triggered when the given java class is loaded.
    ///
    /// Returns whether a request was issued.
    pub async fn hook_java_on_load(&mut self, class: &str) -> bool {
        if class.is_empty() || self.hooks.java_on_load().contains_key(class) {
            return false;
        }

        self.dwarf_api("hookJavaOnLoad", vec![json!(class)], 0).await;
        true
    }

    /// Requests a watcher on the given address.
    ///
    /// The watcher is registered once the payload acknowledges it.
    pub async fn add_watcher(&mut self, ptr: u64) -> Option<ApiValue> {
        if ptr == 0 {
            return None;
        }

        self.dwarf_api("addWatcher", vec![json!(hex_ptr(ptr))], 0).await
    }

    /// Requests the removal of the watcher on the given address.
    pub async fn remove_watcher(&mut self, ptr: u64) -> Option<ApiValue> {
        self.dwarf_api("removeWatcher", vec![json!(hex_ptr(ptr))], 0).await
    }

    /// Returns whether a watcher is registered on the given address.
    pub fn is_address_watched(&self, ptr: u64) -> bool {
        self.hooks.is_watched(ptr)
    }

    /// Reads the target memory.
    ///
    /// Large reads are split in chunks of [READ_CHUNK_SIZE] bytes. Returns
    /// `None` if any chunk can't be read.
    #[tracing::instrument(name = "ReadMemory", level = "debug", skip(self))]
    pub async fn read_memory(&mut self, ptr: u64, length: u64) -> Option<Vec<u8>> {
        if length <= READ_CHUNK_SIZE {
            return self.read_chunk(ptr, length).await;
        }

        let mut data = Vec::new();
        let mut position = 0;

        while position < length {
            let size = (length - position).min(READ_CHUNK_SIZE);
            data.extend(self.read_chunk(ptr + position, size).await?);
            position += size;
        }

        Some(data)
    }

    async fn read_chunk(&mut self, ptr: u64, size: u64) -> Option<Vec<u8>> {
        self.dwarf_api("readBytes", vec![json!(hex_ptr(ptr)), json!(size)], 0)
            .await?
            .into_bytes()
    }

    /// Dumps the target memory into a file.
    ///
    /// Returns `false` if the memory can't be read.
    pub async fn dump_memory(&mut self, path: &Path, ptr: u64, length: u64) -> Result<bool> {
        let Some(data) = self.read_memory(ptr, length).await else {
            return Ok(false);
        };

        std::fs::write(path, data).map_err(|e| Error::Io(path.to_path_buf(), e))?;

        tracing::info!(path = %path.display(), length, "memory dumped");

        Ok(true)
    }

    /// Scans a memory region for a hex pattern (e.g., `41??43`).
    ///
    /// Results are delivered as [MemoryScanResult](crate::handler::Event::MemoryScanResult)
    /// events. Returns `false` if the pattern is malformed.
    pub async fn search(&mut self, start: u64, size: u64, pattern: &str) -> bool {
        let Some(pattern) = scan_pattern(pattern) else {
            return false;
        };

        self.dwarf_api(
            "memoryScan",
            vec![json!(hex_ptr(start)), json!(size), json!(pattern)],
            0,
        ).await;
        true
    }

    /// Scans a list of memory ranges (as reported by the payload) for a hex
    /// pattern.
    ///
    /// Returns `false` if the pattern is malformed.
    pub async fn search_list(&mut self, ranges: &serde_json::Value, pattern: &str) -> bool {
        let Some(pattern) = scan_pattern(pattern) else {
            return false;
        };

        self.dwarf_api(
            "memoryScanList",
            vec![json!(ranges.to_string()), json!(pattern)],
            0,
        ).await;
        true
    }

    async fn live_hook_patches(&mut self) -> Option<Vec<HookPatch>> {
        let hooks = self.script.as_mut()?.hooks().await.ok()?;

        let patches = hooks
            .as_object()?
            .values()
            .filter_map(|hook| {
                let ptr = ptr::parse_ptr_value(hook.get("nativePtr")?)?;
                let bytes = hex::decode(hook.get("bytes")?.as_str()?).ok()?;

                (ptr > 0 && !bytes.is_empty()).then_some(HookPatch { ptr, bytes })
            })
            .collect();

        Some(patches)
    }
}

impl<D: Device> RangeSource for Relay<D> {
    async fn get_range(&mut self, address: u64) -> Option<RangeInfo> {
        let range = self
            .dwarf_api("getRange", vec![json!(hex_ptr(address))], 0)
            .await?;
        let range = range.as_json()?;

        Some(RangeInfo {
            base: ptr::parse_ptr_value(range.get("base")?)?,
            size: ptr::parse_ptr_value(range.get("size")?)?,
        })
    }

    async fn read_memory(&mut self, base: u64, size: u64) -> Option<Vec<u8>> {
        Relay::<D>::read_memory(self, base, size).await
    }

    async fn hook_patches(&mut self) -> Vec<HookPatch> {
        if let Some(patches) = self.live_hook_patches().await {
            return patches;
        }

        self.hooks
            .native()
            .values()
            .map(|hook| HookPatch {
                ptr: hook.ptr,
                bytes: hook.bytes.clone(),
            })
            .collect()
    }
}

/// Validates a hex byte pattern and spaces it in byte pairs.
fn scan_pattern(pattern: &str) -> Option<String> {
    let pattern: String = pattern.chars().filter(|c| !c.is_whitespace()).collect();

    let valid = SCAN_PATTERN
        .as_ref()
        .is_ok_and(|regex| regex.is_match(&pattern));
    if !valid {
        tracing::warn!(pattern, "malformed scan pattern");
        return None;
    }

    let pairs: Vec<&str> = pattern
        .as_bytes()
        .chunks(2)
        .filter_map(|pair| std::str::from_utf8(pair).ok())
        .collect();

    Some(pairs.join(" "))
}
