use std::ffi::{c_char, c_void, CStr};
use ash::vk;
use color_eyre::Result;
use color_eyre::eyre::eyre;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::window::Window;

/// Initializes Vulkan and keeps the instance and its diagnostic messenger
/// alive for the lifetime of the renderer.
pub struct RenderInstance {
    pub entry: ash::Entry,
    pub instance: ash::Instance,
    debug_utils_messenger: vk::DebugUtilsMessengerEXT,
    debug_utils_loader: Option<ash::ext::debug_utils::Instance>,
}

impl RenderInstance {
    const ENABLE_VALIDATION_LAYERS: bool = cfg!(debug_assertions);
    const REQUESTED_VALIDATION_LAYERS: &'static [&'static CStr] =
        &[c"VK_LAYER_KHRONOS_validation"];

    pub fn new(window: &Window) -> Result<Self> {
        let entry = ash::Entry::linked();

        let (instance, debug_utils_enabled) = Self::create_instance(&entry, window)?;

        let (debug_utils_messenger, debug_utils_loader) = if debug_utils_enabled {
            let (messenger, loader) = Self::create_debug_utils_messenger(&entry, &instance)?;
            (messenger, Some(loader))
        } else {
            (vk::DebugUtilsMessengerEXT::null(), None)
        };

        Ok(Self {
            entry,
            instance,
            debug_utils_messenger,
            debug_utils_loader,
        })
    }

    fn create_instance(
        entry: &ash::Entry,
        window: &Window,
    ) -> Result<(ash::Instance, bool)> {
        let available_extensions = unsafe {
            entry.enumerate_instance_extension_properties(None)?
        };
        let extension_supported = |name: &CStr| {
            available_extensions.iter().any(|ext| {
                ext.extension_name_as_c_str()
                    .map_or(false, |supported| supported == name)
            })
        };

        // Surface and platform-surface extensions are hard requirements;
        // nothing can be presented without them
        let mut enabled_extensions = Vec::new();
        for ext in ash_window::enumerate_required_extensions(
            window.display_handle()?.as_raw()
        )? {
            let ext = unsafe { CStr::from_ptr(*ext) };
            if !extension_supported(ext) {
                return Err(eyre!(
                    "required instance extension {:?} not available",
                    ext
                ));
            }
            enabled_extensions.push(ext);
        }

        let debug_utils_enabled = if extension_supported(ash::ext::debug_utils::NAME) {
            enabled_extensions.push(ash::ext::debug_utils::NAME);
            true
        } else {
            log::warn!("{:?} not available, Vulkan diagnostics disabled", ash::ext::debug_utils::NAME);
            false
        };

        #[cfg(target_os = "macos")]
        {
            enabled_extensions.push(ash::khr::portability_enumeration::NAME);
            enabled_extensions.push(ash::khr::get_physical_device_properties2::NAME);
        }

        let enabled_layer_names = Self::supported_validation_layers(entry)?
            .iter()
            .map(|layer| layer.as_ptr())
            .collect::<Vec<*const c_char>>();
        let enabled_extension_names = enabled_extensions
            .iter()
            .map(|ext| ext.as_ptr())
            .collect::<Vec<*const c_char>>();

        let application_info = vk::ApplicationInfo::default()
            .application_name(c"rigview")
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"rigview")
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_1);

        let mut debug_info = debug_utils_messenger_create_info();
        let instance_info = vk::InstanceCreateInfo::default()
            .application_info(&application_info)
            .enabled_layer_names(&enabled_layer_names)
            .enabled_extension_names(&enabled_extension_names);
        let instance_info = if debug_utils_enabled {
            instance_info.push_next(&mut debug_info)
        } else {
            instance_info
        };

        #[cfg(target_os = "macos")]
        let instance_info = instance_info
            .flags(vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR);

        let instance = unsafe {
            entry.create_instance(&instance_info, None)?
        };

        Ok((instance, debug_utils_enabled))
    }

    fn create_debug_utils_messenger(
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<(vk::DebugUtilsMessengerEXT, ash::ext::debug_utils::Instance)> {
        let debug_utils_loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let debug_utils_info = debug_utils_messenger_create_info();
        let debug_utils_messenger = unsafe {
            debug_utils_loader.create_debug_utils_messenger(&debug_utils_info, None)?
        };
        Ok((debug_utils_messenger, debug_utils_loader))
    }

    /// Validation layers are a convenience, not a requirement. Missing ones
    /// are skipped with a warning.
    fn supported_validation_layers(entry: &ash::Entry) -> Result<Vec<&'static CStr>> {
        if !Self::ENABLE_VALIDATION_LAYERS {
            return Ok(Vec::new());
        }

        let available_layers = unsafe {
            entry.enumerate_instance_layer_properties()?
        };

        let mut layers = Vec::new();
        for layer in Self::REQUESTED_VALIDATION_LAYERS {
            let supported = available_layers.iter().any(|props| {
                props
                    .layer_name_as_c_str()
                    .map_or(false, |name| name == *layer)
            });
            if supported {
                layers.push(*layer);
            } else {
                log::warn!("Validation layer {:?} not available, skipping", layer);
            }
        }

        Ok(layers)
    }
}

impl Drop for RenderInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some(loader) = self.debug_utils_loader.take() {
                loader.destroy_debug_utils_messenger(self.debug_utils_messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn debug_utils_messenger_create_info(
) -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    let message_severity = vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
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

/// Classifies driver messages by severity and type and forwards them to the
/// logger. Never aborts on its own.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let msg_type = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "[General]",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "[Performance]",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "[Validation]",
        _ => "[Unknown]",
    };
    let msg = unsafe {
        CStr::from_ptr((*p_callback_data).p_message)
    };
    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => {
            log::trace!("[Verbose]{} {:?}", msg_type, msg);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Warning]{} {:?}", msg_type, msg);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Error]{} {:?}", msg_type, msg);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            log::info!("[Info]{} {:?}", msg_type, msg);
        }
        _ => {
            log::warn!("[Unknown]{} {:?}", msg_type, msg);
        }
    }

    vk::FALSE
}
