//! Vulkan instance creation and debug messaging.

use crate::error::{GpuError, Result};
use ash::vk;
use std::ffi::{c_char, c_void, CStr, CString};

/// Extension required to receive validation messages.
pub const DEBUG_EXTENSION: &CStr = ash::ext::debug_utils::NAME;

/// Layer enabled alongside [`DEBUG_EXTENSION`].
pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

const ENGINE_NAME: &CStr = c"vkengine";

/// Semantic application version passed to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Pack into the `VK_MAKE_API_VERSION` layout (variant 0).
    pub const fn to_vk(self) -> u32 {
        vk::make_api_version(0, self.major, self.minor, self.patch)
    }
}

struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

/// Owns the loader entry, the `VkInstance` and the optional debug messenger.
pub struct Instance {
    entry: ash::Entry,
    instance: ash::Instance,
    surface_loader: ash::khr::surface::Instance,
    debug: Option<DebugMessenger>,
}

impl Instance {
    /// Create an instance with the given extensions and layers enabled.
    ///
    /// When `enable_debug` is set and the loader offers both the debug-utils
    /// extension and the Khronos validation layer, they are appended to the
    /// requested lists and a messenger routing into `tracing` is registered.
    pub fn new(
        app_name: &str,
        app_version: Version,
        enable_debug: bool,
        extensions: &[&CStr],
        layers: &[&CStr],
    ) -> Result<Self> {
        let entry =
            unsafe { ash::Entry::load() }.map_err(|e| GpuError::Loading(e.to_string()))?;

        let available_extensions = Self::available_extensions(&entry)?;
        let available_layers = Self::available_layers(&entry)?;

        let mut requested_extensions: Vec<&CStr> = extensions.to_vec();
        let mut requested_layers: Vec<&CStr> = layers.to_vec();

        let debug_available = missing_names(&available_extensions, &[DEBUG_EXTENSION])
            .is_empty()
            && missing_names(&available_layers, &[VALIDATION_LAYER]).is_empty();

        let enable_debug = if enable_debug && !debug_available {
            tracing::error!(
                "Cannot enable debug messages: required extension(s) or layer(s) not available"
            );
            false
        } else {
            enable_debug
        };

        if enable_debug {
            push_unique(&mut requested_extensions, DEBUG_EXTENSION);
            push_unique(&mut requested_layers, VALIDATION_LAYER);
        }

        let missing = missing_names(&available_extensions, &requested_extensions);
        if !missing.is_empty() {
            for name in &missing {
                tracing::warn!("Instance is missing extension '{name}', which was requested");
            }
            return Err(GpuError::ExtensionNotSupported(missing.join(", ")));
        }

        let missing = missing_names(&available_layers, &requested_layers);
        if !missing.is_empty() {
            for name in &missing {
                tracing::warn!("Instance is missing layer '{name}', which was requested");
            }
            return Err(GpuError::LayerNotSupported(missing.join(", ")));
        }

        let app_name = CString::new(app_name)
            .map_err(|_| GpuError::InvalidState("application name contains a NUL byte".into()))?;

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(app_version.to_vk())
            .engine_name(ENGINE_NAME)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let extension_names: Vec<*const c_char> =
            requested_extensions.iter().map(|ext| ext.as_ptr()).collect();
        let layer_names: Vec<*const c_char> = requested_layers.iter().map(|l| l.as_ptr()).collect();

        let mut debug_info = debug_messenger_info();

        let mut create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extension_names)
            .enabled_layer_names(&layer_names);

        // Chained so that messages emitted during vkCreateInstance are reported too.
        if enable_debug {
            create_info = create_info.push_next(&mut debug_info);
        }

        let instance = unsafe { entry.create_instance(&create_info, None)? };

        let debug = if enable_debug {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger_info = debug_messenger_info();
            match unsafe { loader.create_debug_utils_messenger(&messenger_info, None) } {
                Ok(messenger) => Some(DebugMessenger { loader, messenger }),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        let messages = on_off(debug.is_some());
        tracing::info!(
            "Vulkan instance created ({} extensions, {} layers, debug messages {})",
            requested_extensions.len(),
            requested_layers.len(),
            messages
        );

        Ok(Self {
            entry,
            instance,
            surface_loader,
            debug,
        })
    }

    /// Instance extensions reported by the loader.
    pub fn available_extensions(entry: &ash::Entry) -> Result<Vec<String>> {
        let properties = unsafe { entry.enumerate_instance_extension_properties(None)? };
        Ok(properties
            .iter()
            .map(|p| unsafe { CStr::from_ptr(p.extension_name.as_ptr()) })
            .map(|name| name.to_string_lossy().into_owned())
            .collect())
    }

    /// Instance layers reported by the loader.
    pub fn available_layers(entry: &ash::Entry) -> Result<Vec<String>> {
        let properties = unsafe { entry.enumerate_instance_layer_properties()? };
        Ok(properties
            .iter()
            .map(|p| unsafe { CStr::from_ptr(p.layer_name.as_ptr()) })
            .map(|name| name.to_string_lossy().into_owned())
            .collect())
    }

    /// Check the loader offers every extension in `wanted`, warning about each gap.
    pub fn has_all_extensions(entry: &ash::Entry, wanted: &[&CStr]) -> Result<bool> {
        let missing = missing_names(&Self::available_extensions(entry)?, wanted);
        for name in &missing {
            tracing::warn!("Instance is missing extension '{name}', which was requested");
        }
        Ok(missing.is_empty())
    }

    /// Check the loader offers every layer in `wanted`, warning about each gap.
    pub fn has_all_layers(entry: &ash::Entry, wanted: &[&CStr]) -> Result<bool> {
        let missing = missing_names(&Self::available_layers(entry)?, wanted);
        for name in &missing {
            tracing::warn!("Instance is missing layer '{name}', which was requested");
        }
        Ok(missing.is_empty())
    }

    /// The loader entry point.
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// The raw instance.
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    /// `VK_KHR_surface` function table.
    pub fn surface_loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }

    /// Whether validation messages are being routed to the log.
    pub fn debug_messages_enabled(&self) -> bool {
        self.debug.is_some()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some(debug) = self.debug.take() {
                debug
                    .loader
                    .destroy_debug_utils_messenger(debug.messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Names from `wanted` that do not appear in `available`.
pub fn missing_names(available: &[String], wanted: &[&CStr]) -> Vec<String> {
    wanted
        .iter()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !available.iter().any(|a| a == name))
        .collect()
}

fn push_unique<'a>(list: &mut Vec<&'a CStr>, name: &'a CStr) {
    if !list.contains(&name) {
        list.push(name);
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

fn debug_messenger_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
}

/// Short tag for a debug message type.
fn message_type_name(message_type: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::GENERAL) {
        "GENERAL"
    } else if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "VALIDATION"
    } else if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "PERFORMANCE"
    } else {
        "INVALID TYPE"
    }
}

/// Log level for a debug message severity. Verbose driver chatter maps to debug.
fn severity_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> tracing::Level {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::Level::ERROR
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::Level::WARN
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        tracing::Level::INFO
    } else {
        tracing::Level::DEBUG
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if callback_data.is_null() {
        "<no message>".into()
    } else {
        let message_ptr = unsafe { (*callback_data).p_message };
        if message_ptr.is_null() {
            "<no message>".into()
        } else {
            unsafe { CStr::from_ptr(message_ptr) }.to_string_lossy()
        }
    };
    let kind = message_type_name(message_type);

    let level = severity_level(severity);
    if level == tracing::Level::ERROR {
        tracing::error!(target: "vulkan", "[{kind}] {message}");
    } else if level == tracing::Level::WARN {
        tracing::warn!(target: "vulkan", "[{kind}] {message}");
    } else if level == tracing::Level::INFO {
        tracing::info!(target: "vulkan", "[{kind}] {message}");
    } else {
        tracing::debug!(target: "vulkan", "[{kind}] {message}");
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_names_reports_only_absent_entries() {
        let available = vec![
            "VK_KHR_surface".to_string(),
            "VK_KHR_xlib_surface".to_string(),
        ];
        let wanted = [c"VK_KHR_surface", c"VK_EXT_debug_utils"];

        assert_eq!(missing_names(&available, &wanted), vec!["VK_EXT_debug_utils"]);
        assert!(missing_names(&available, &[c"VK_KHR_surface"]).is_empty());
        assert!(missing_names(&[], &[]).is_empty());
    }

    #[test]
    fn push_unique_skips_duplicates() {
        let mut list = vec![c"VK_KHR_surface"];
        push_unique(&mut list, DEBUG_EXTENSION);
        push_unique(&mut list, DEBUG_EXTENSION);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn debug_state_reads_on_or_off() {
        assert_eq!(on_off(true), "on");
        assert_eq!(on_off(false), "off");
    }

    #[test]
    fn severity_maps_to_log_level() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;
        assert_eq!(severity_level(Severity::VERBOSE), tracing::Level::DEBUG);
        assert_eq!(severity_level(Severity::INFO), tracing::Level::INFO);
        assert_eq!(severity_level(Severity::WARNING), tracing::Level::WARN);
        assert_eq!(severity_level(Severity::ERROR), tracing::Level::ERROR);
    }

    #[test]
    fn message_type_tags() {
        use vk::DebugUtilsMessageTypeFlagsEXT as Kind;
        assert_eq!(message_type_name(Kind::GENERAL), "GENERAL");
        assert_eq!(message_type_name(Kind::VALIDATION), "VALIDATION");
        assert_eq!(message_type_name(Kind::PERFORMANCE), "PERFORMANCE");
        assert_eq!(message_type_name(Kind::empty()), "INVALID TYPE");
    }

    #[test]
    fn version_packs_like_vk_make_api_version() {
        let v = Version::new(1, 2, 3);
        assert_eq!(vk::api_version_major(v.to_vk()), 1);
        assert_eq!(vk::api_version_minor(v.to_vk()), 2);
        assert_eq!(vk::api_version_patch(v.to_vk()), 3);
    }
}
