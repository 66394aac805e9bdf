use crate::core::{PlayerError, Result};
use ffmpeg_next::{codec, ffi, util::frame};
use log::{debug, error};
use serde::{Deserialize, Serialize};
#[cfg(feature = "hwaccel")]
use log::{info, warn};
#[cfg(feature = "hwaccel")]
use std::ffi::CStr;
#[cfg(any(feature = "hwaccel", test))]
use std::ptr;

/// 硬件解码器类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HWAccelType {
    None,           // CPU 软解
    DXVA2,          // Windows DirectX Video Acceleration 2
    D3D11VA,        // Windows Direct3D 11
    VAAPI,          // Linux Video Acceleration API
    VDPAU,          // Linux/Unix VDPAU
    VideoToolbox,   // macOS VideoToolbox
    CUDA,           // NVIDIA CUDA
    QSV,            // Intel Quick Sync Video
    DRM,            // Linux DRM PRIME
    Vulkan,
    Other,          // FFmpeg 支持但这里未单独列出的后端
}

impl HWAccelType {
    /// 获取硬件类型名称
    pub fn name(&self) -> &'static str {
        match self {
            HWAccelType::None => "CPU软解",
            HWAccelType::DXVA2 => "DXVA2",
            HWAccelType::D3D11VA => "D3D11VA",
            HWAccelType::VAAPI => "VAAPI",
            HWAccelType::VDPAU => "VDPAU",
            HWAccelType::VideoToolbox => "VideoToolbox",
            HWAccelType::CUDA => "CUDA",
            HWAccelType::QSV => "QSV",
            HWAccelType::DRM => "DRM",
            HWAccelType::Vulkan => "Vulkan",
            HWAccelType::Other => "其他",
        }
    }

    /// 从 FFmpeg 硬件设备类型转换
    pub fn from_ffmpeg_type(device_type: ffi::AVHWDeviceType) -> Self {
        use ffi::AVHWDeviceType::*;
        match device_type {
            AV_HWDEVICE_TYPE_NONE => HWAccelType::None,
            AV_HWDEVICE_TYPE_DXVA2 => HWAccelType::DXVA2,
            AV_HWDEVICE_TYPE_D3D11VA => HWAccelType::D3D11VA,
            AV_HWDEVICE_TYPE_VAAPI => HWAccelType::VAAPI,
            AV_HWDEVICE_TYPE_VDPAU => HWAccelType::VDPAU,
            AV_HWDEVICE_TYPE_VIDEOTOOLBOX => HWAccelType::VideoToolbox,
            AV_HWDEVICE_TYPE_CUDA => HWAccelType::CUDA,
            AV_HWDEVICE_TYPE_QSV => HWAccelType::QSV,
            AV_HWDEVICE_TYPE_DRM => HWAccelType::DRM,
            AV_HWDEVICE_TYPE_VULKAN => HWAccelType::Vulkan,
            _ => HWAccelType::Other,
        }
    }
}

#[cfg(feature = "hwaccel")]
/// 枚举 FFmpeg 编译进来的所有硬件设备类型（FFmpeg 自身的顺序）
fn available_device_types() -> Vec<ffi::AVHWDeviceType> {
    let mut types = Vec::new();
    let mut current = ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_NONE;
    loop {
        current = unsafe { ffi::av_hwdevice_iterate_types(current) };
        if current == ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_NONE {
            break;
        }
        types.push(current);
    }
    types
}

#[cfg(feature = "hwaccel")]
/// 按偏好调整候选顺序：偏好类型（若存在）排到最前，其余保持原顺序
fn order_candidates<T: Copy>(
    mut candidates: Vec<T>,
    preferred: Option<HWAccelType>,
    kind_of: impl Fn(T) -> HWAccelType,
) -> Vec<T> {
    if let Some(preferred) = preferred {
        if let Some(pos) = candidates.iter().position(|c| kind_of(*c) == preferred) {
            let first = candidates.remove(pos);
            candidates.insert(0, first);
        }
    }
    candidates
}

#[cfg(feature = "hwaccel")]
/// 查询解码器在该设备类型下支持的硬件像素格式（仅限 hw_device_ctx 方式）
fn codec_hw_pixel_format(
    codec: &codec::Codec,
    device_type: ffi::AVHWDeviceType,
) -> Option<ffi::AVPixelFormat> {
    let mut index = 0;
    loop {
        let config = unsafe { ffi::avcodec_get_hw_config(codec.as_ptr(), index) };
        if config.is_null() {
            return None;
        }
        let (methods, config_type, pix_fmt) =
            unsafe { ((*config).methods, (*config).device_type, (*config).pix_fmt) };
        let uses_device_ctx =
            (methods as u32) & (ffi::AV_CODEC_HW_CONFIG_METHOD_HW_DEVICE_CTX as u32) != 0;
        if uses_device_ctx && config_type == device_type {
            return Some(pix_fmt);
        }
        index += 1;
    }
}

/// 格式协商：解码器提供的候选列表中包含协商格式则原样返回，否则不支持
pub fn pick_negotiated_format(
    offered: &[ffi::AVPixelFormat],
    negotiated: ffi::AVPixelFormat,
) -> Option<ffi::AVPixelFormat> {
    offered.iter().copied().find(|format| *format == negotiated)
}

/// `AVCodecContext.get_format` 回调
///
/// 协商好的格式由 `HardwareContext` 持有，通过 `opaque` 指针传进来，
/// 每个解码器实例各自一份，不依赖进程级全局变量。
unsafe extern "C" fn negotiate_hw_pixel_format(
    context: *mut ffi::AVCodecContext,
    formats: *const ffi::AVPixelFormat,
) -> ffi::AVPixelFormat {
    let negotiated = (*context).opaque as *const ffi::AVPixelFormat;
    if negotiated.is_null() || formats.is_null() {
        return ffi::AVPixelFormat::AV_PIX_FMT_NONE;
    }

    let mut offered = Vec::new();
    let mut cursor = formats;
    while *cursor != ffi::AVPixelFormat::AV_PIX_FMT_NONE {
        offered.push(*cursor);
        cursor = cursor.add(1);
    }

    match pick_negotiated_format(&offered, *negotiated) {
        Some(format) => format,
        None => {
            error!("解码器未提供协商好的硬件像素格式 {:?}", *negotiated);
            ffi::AVPixelFormat::AV_PIX_FMT_NONE
        }
    }
}

/// 硬件设备上下文
///
/// 在任何解码线程启动前创建，解码器销毁后才释放。
pub struct HardwareContext {
    device: *mut ffi::AVBufferRef,
    hw_type: HWAccelType,
    // 放在堆上，地址在整个生命周期内不变，供 get_format 回调读取
    pixel_format: Box<ffi::AVPixelFormat>,
}

// AVBufferRef 是引用计数的，这里只做 ref/unref；像素格式在线程启动前写定，之后只读
unsafe impl Send for HardwareContext {}

impl HardwareContext {
    pub fn hw_type(&self) -> HWAccelType {
        self.hw_type
    }

    /// 协商好的硬件像素格式
    pub fn pixel_format(&self) -> ffi::AVPixelFormat {
        *self.pixel_format
    }

    /// 帧是否还在显存中（格式等于协商的硬件格式）
    pub fn is_hw_frame(&self, frame: &frame::Video) -> bool {
        let format = unsafe { (*frame.as_ptr()).format };
        format == *self.pixel_format as i32
    }

    /// 没有真实设备的上下文，只用于驱动帧分类与传输失败路径
    #[cfg(test)]
    pub(crate) fn detached(hw_type: HWAccelType, pixel_format: ffi::AVPixelFormat) -> Self {
        Self {
            device: ptr::null_mut(),
            hw_type,
            pixel_format: Box::new(pixel_format),
        }
    }

    /// 把设备引用和协商回调挂到（尚未打开的）解码器上下文
    ///
    /// # Safety
    /// `self` 必须比解码器活得更久。
    pub(crate) unsafe fn attach(&self, context: &mut codec::Context) -> Result<()> {
        let raw = context.as_mut_ptr();
        let device_ref = ffi::av_buffer_ref(self.device);
        if device_ref.is_null() {
            return Err(PlayerError::CodecOpen {
                kind: "视频",
                reason: "无法引用硬件设备".to_string(),
            });
        }
        (*raw).hw_device_ctx = device_ref;
        (*raw).opaque = &*self.pixel_format as *const ffi::AVPixelFormat as *mut _;
        (*raw).get_format = Some(negotiate_hw_pixel_format);
        Ok(())
    }
}

impl Drop for HardwareContext {
    fn drop(&mut self) {
        if !self.device.is_null() {
            unsafe {
                ffi::av_buffer_unref(&mut self.device);
            }
            debug!("硬件设备上下文已释放: {}", self.hw_type.name());
        }
    }
}

/// 将硬件帧传输到 CPU 内存
pub fn transfer_to_host(hw_frame: &frame::Video) -> Result<frame::Video> {
    let mut sw_frame = frame::Video::empty();
    let ret = unsafe { ffi::av_hwframe_transfer_data(sw_frame.as_mut_ptr(), hw_frame.as_ptr(), 0) };
    if ret < 0 {
        return Err(PlayerError::TransferError(ffmpeg_next::Error::from(ret).to_string()));
    }

    unsafe {
        (*sw_frame.as_mut_ptr()).pts = (*hw_frame.as_ptr()).pts;
        (*sw_frame.as_mut_ptr()).repeat_pict = (*hw_frame.as_ptr()).repeat_pict;
    }
    Ok(sw_frame)
}

/// 硬件设备探测器
///
/// 按顺序尝试各个后端，第一个解码器兼容且设备创建成功的胜出。
/// 全部失败时返回 None，调用方直接走软解，不视为错误。
#[derive(Debug, Clone, Copy)]
pub struct HardwareDeviceResolver {
    enabled: bool,
    preferred: Option<HWAccelType>,
}

impl HardwareDeviceResolver {
    pub fn new(enabled: bool, preferred: Option<HWAccelType>) -> Self {
        Self { enabled, preferred }
    }

    /// 仅软解
    pub fn software_only() -> Self {
        Self::new(false, None)
    }

    /// 未编译 hwaccel 特性时始终为 false
    pub fn is_enabled(&self) -> bool {
        cfg!(feature = "hwaccel") && self.enabled && self.preferred != Some(HWAccelType::None)
    }

    pub fn resolve(&self, codec: &codec::Codec) -> Option<HardwareContext> {
        if !self.is_enabled() {
            debug!("硬件加速已关闭，使用 CPU 软解");
            return None;
        }
        self.detect_device(codec)
    }

    #[cfg(not(feature = "hwaccel"))]
    fn detect_device(&self, _codec: &codec::Codec) -> Option<HardwareContext> {
        None
    }

    #[cfg(feature = "hwaccel")]
    fn detect_device(&self, codec: &codec::Codec) -> Option<HardwareContext> {
        info!("开始检测硬件加速支持: {}", codec.name());
        let candidates = order_candidates(available_device_types(), self.preferred, HWAccelType::from_ffmpeg_type);

        for device_type in candidates {
            let hw_type = HWAccelType::from_ffmpeg_type(device_type);
            let pixel_format = match codec_hw_pixel_format(codec, device_type) {
                Some(format) => format,
                None => {
                    debug!("{} 不支持 {}", codec.name(), device_type_name(device_type));
                    continue;
                }
            };

            let mut device: *mut ffi::AVBufferRef = ptr::null_mut();
            let ret = unsafe {
                ffi::av_hwdevice_ctx_create(&mut device, device_type, ptr::null(), ptr::null_mut(), 0)
            };
            if ret < 0 || device.is_null() {
                warn!("✗ {} 设备创建失败: {}", device_type_name(device_type), ffmpeg_next::Error::from(ret));
                continue;
            }

            info!("✓ 使用硬件加速: {}（像素格式 {:?}）", device_type_name(device_type), pixel_format);
            return Some(HardwareContext {
                device,
                hw_type,
                pixel_format: Box::new(pixel_format),
            });
        }

        warn!("未检测到可用的硬件加速，将使用 CPU 软解");
        None
    }
}

#[cfg(feature = "hwaccel")]
fn device_type_name(device_type: ffi::AVHWDeviceType) -> String {
    let name = unsafe { ffi::av_hwdevice_get_type_name(device_type) };
    if name.is_null() {
        return format!("{:?}", device_type);
    }
    unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffi::AVPixelFormat::*;

    #[test]
    fn test_negotiation_returns_exact_format() {
        let offered = [AV_PIX_FMT_VAAPI, AV_PIX_FMT_YUV420P];
        assert_eq!(pick_negotiated_format(&offered, AV_PIX_FMT_VAAPI), Some(AV_PIX_FMT_VAAPI));
        assert_eq!(pick_negotiated_format(&offered, AV_PIX_FMT_CUDA), None);
        assert_eq!(pick_negotiated_format(&[], AV_PIX_FMT_CUDA), None);
    }

    #[test]
    fn test_negotiation_callback_reads_per_context_format() {
        unsafe {
            let context = ffi::avcodec_alloc_context3(ptr::null());
            assert!(!context.is_null());

            let negotiated = Box::new(AV_PIX_FMT_CUDA);
            (*context).opaque = &*negotiated as *const ffi::AVPixelFormat as *mut _;

            let offered = [AV_PIX_FMT_YUV420P, AV_PIX_FMT_CUDA, AV_PIX_FMT_NONE];
            assert_eq!(negotiate_hw_pixel_format(context, offered.as_ptr()), AV_PIX_FMT_CUDA);

            let offered = [AV_PIX_FMT_YUV420P, AV_PIX_FMT_NONE];
            assert_eq!(negotiate_hw_pixel_format(context, offered.as_ptr()), AV_PIX_FMT_NONE);

            let mut context = context;
            (*context).opaque = ptr::null_mut();
            ffi::avcodec_free_context(&mut context);
        }
    }

    #[cfg(feature = "hwaccel")]
    #[test]
    fn test_preferred_candidate_moves_first() {
        let order = order_candidates(
            vec![HWAccelType::VDPAU, HWAccelType::CUDA, HWAccelType::VAAPI],
            Some(HWAccelType::VAAPI),
            |t| t,
        );
        assert_eq!(order, vec![HWAccelType::VAAPI, HWAccelType::VDPAU, HWAccelType::CUDA]);

        let unchanged = order_candidates(vec![HWAccelType::CUDA], Some(HWAccelType::QSV), |t| t);
        assert_eq!(unchanged, vec![HWAccelType::CUDA]);
    }

    #[test]
    fn test_device_type_mapping() {
        assert_eq!(
            HWAccelType::from_ffmpeg_type(ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_VAAPI),
            HWAccelType::VAAPI
        );
        assert_eq!(
            HWAccelType::from_ffmpeg_type(ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_NONE),
            HWAccelType::None
        );
        assert_eq!(HWAccelType::CUDA.name(), "CUDA");
    }

    #[test]
    fn test_disabled_resolver_is_software_only() {
        assert!(!HardwareDeviceResolver::software_only().is_enabled());
        assert!(!HardwareDeviceResolver::new(true, Some(HWAccelType::None)).is_enabled());
        assert_eq!(HardwareDeviceResolver::new(true, None).is_enabled(), cfg!(feature = "hwaccel"));
    }

    #[test]
    fn test_codec_without_hw_configs_resolves_to_software() {
        ffmpeg_next::init().unwrap();
        let codec = ffmpeg_next::decoder::find(codec::Id::RAWVIDEO).unwrap();
        assert!(HardwareDeviceResolver::new(true, None).resolve(&codec).is_none());
        assert!(HardwareDeviceResolver::software_only().resolve(&codec).is_none());
    }
}
