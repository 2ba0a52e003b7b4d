use std::ffi::{c_char, c_void, CStr};
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use crate::renderer::vk::handle::HandleWithOwner;

pub type SurfaceHandle = HandleWithOwner<vk::SurfaceKHR, ash::khr::surface::Instance>;
type DebugMessenger = HandleWithOwner<vk::DebugUtilsMessengerEXT, ash::ext::debug_utils::Instance>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    Off,
    /// Enable the layer if installed, otherwise continue without it
    IfAvailable,
    /// A missing layer is an error
    Required,
}

/// Whether the validation layer gets enabled for `mode`
pub fn resolve_validation(mode: ValidationMode, layer_supported: bool) -> Result<bool> {
    match mode {
        ValidationMode::Off => Ok(false),
        ValidationMode::IfAvailable => {
            if !layer_supported {
                log::warn!(
                    "Validation layer {:?} not found, continuing without validation",
                    RenderInstance::VALIDATION_LAYER,
                );
            }
            Ok(layer_supported)
        }
        ValidationMode::Required if layer_supported => Ok(true),
        ValidationMode::Required => Err(eyre!(
            "Validation layer {:?} not supported",
            RenderInstance::VALIDATION_LAYER,
        )),
    }
}

/// Initializes Vulkan and keeps the Vulkan instance alive
pub struct RenderInstance {
    pub entry: ash::Entry,
    pub instance: ash::Instance,
    pub surface_loader: ash::khr::surface::Instance,
    debug_messenger: DebugMessenger,
}

impl RenderInstance {
    const VALIDATION_LAYER: &'static CStr = c"VK_LAYER_KHRONOS_validation";

    /// `display` is `None` for headless use such as listing devices
    pub fn new(
        display: Option<RawDisplayHandle>,
        validation: ValidationMode,
    ) -> Result<Self> {
        let entry = ash::Entry::linked();

        let enable_validation = match validation {
            ValidationMode::Off => false,
            mode => resolve_validation(mode, Self::is_validation_layer_supported(&entry)?)?,
        };

        let instance = Self::create_instance(&entry, display, enable_validation)?;
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        let debug_messenger = if enable_validation {
            match Self::create_debug_utils_messenger(&entry, &instance) {
                Ok(messenger) => messenger,
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            DebugMessenger::null()
        };

        log::info!(
            "Created Vulkan instance (validation: {})",
            if enable_validation { "on" } else { "off" },
        );

        Ok(Self {
            entry,
            instance,
            surface_loader,
            debug_messenger,
        })
    }

    pub fn create_surface(
        &self,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Result<SurfaceHandle> {
        let surface = unsafe {
            ash_window::create_surface(
                &self.entry,
                &self.instance,
                display,
                window,
                None,
            )?
        };
        Ok(SurfaceHandle::surface(&self.surface_loader, surface))
    }

    fn create_instance(
        entry: &ash::Entry,
        display: Option<RawDisplayHandle>,
        enable_validation: bool,
    ) -> Result<ash::Instance> {
        let application_info = vk::ApplicationInfo::default()
            .application_name(c"vkraii")
            .engine_name(c"vkraii")
            .api_version(vk::API_VERSION_1_1);
        let enabled_layer_names = if enable_validation {
            vec![Self::VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };
        let enabled_extension_names = Self::get_required_instance_extensions(display, enable_validation)?
            .iter()
            .map(|ext| ext.as_ptr())
            .collect::<Vec<*const c_char>>();

        let mut debug_info = debug_utils_messenger_create_info();
        let mut instance_info = vk::InstanceCreateInfo::default()
            .application_info(&application_info)
            .enabled_layer_names(&enabled_layer_names)
            .enabled_extension_names(&enabled_extension_names);
        // Also catch messages emitted while the instance itself is created
        if enable_validation {
            instance_info = instance_info.push_next(&mut debug_info);
        }

        #[cfg(target_os = "macos")]
        let instance_info = instance_info
            .flags(vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR);

        Ok(unsafe {
            entry.create_instance(&instance_info, None)?
        })
    }

    fn create_debug_utils_messenger(
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<DebugMessenger> {
        let debug_utils_loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let debug_utils_info = debug_utils_messenger_create_info();
        let messenger = unsafe {
            debug_utils_loader.create_debug_utils_messenger(&debug_utils_info, None)?
        };
        Ok(DebugMessenger::debug_messenger(&debug_utils_loader, messenger))
    }

    fn get_required_instance_extensions(
        display: Option<RawDisplayHandle>,
        enable_validation: bool,
    ) -> Result<Vec<&'static CStr>> {
        let mut exts = if let Some(display) = display {
            ash_window::enumerate_required_extensions(display)?
                .iter()
                .map(|ext| unsafe {
                    CStr::from_ptr(*ext)
                })
                .collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        if enable_validation {
            exts.push(ash::ext::debug_utils::NAME);
        }

        #[cfg(target_os = "macos")]
        {
            exts.push(ash::khr::portability_enumeration::NAME);
            exts.push(ash::khr::get_physical_device_properties2::NAME);
        }

        Ok(exts)
    }

    fn is_validation_layer_supported(entry: &ash::Entry) -> Result<bool> {
        let supported_layers = unsafe {
            entry.enumerate_instance_layer_properties()?
        };

        Ok(supported_layers
            .iter()
            .filter_map(|props| props.layer_name_as_c_str().ok())
            .any(|name| name == Self::VALIDATION_LAYER))
    }
}

impl Drop for RenderInstance {
    fn drop(&mut self) {
        self.debug_messenger.reset();
        unsafe {
            self.instance.destroy_instance(None);
        }
    }
}

fn debug_utils_messenger_create_info(
) -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    let message_severity = vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR;
    let message_type = vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE;
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(message_severity)
        .message_type(message_type)
        .pfn_user_callback(Some(debug_callback))
}

fn message_type_label(message_type: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "[General]",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "[Performance]",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "[Validation]",
        _ => "[Unknown]",
    }
}

fn severity_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> log::Level {
    match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => log::Level::Trace,
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => log::Level::Info,
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::Level::Warn,
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::Level::Error,
        _ => log::Level::Warn,
    }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }
    let msg = unsafe {
        let p_message = (*p_callback_data).p_message;
        if p_message.is_null() {
            return vk::FALSE;
        }
        CStr::from_ptr(p_message)
    };

    log::log!(
        severity_level(message_severity),
        "{} {}",
        message_type_label(message_type),
        msg.to_string_lossy(),
    );

    vk::FALSE
}
