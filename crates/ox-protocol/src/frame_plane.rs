//! Shared-memory frame plane.
//!
//! Layout is a single region: a 4 KiB page-aligned header (`SharedData`)
//! carrying connection flags, session state, and the seqlock'd per-tick
//! frame, followed by two page-aligned `FrameTexture` blocks for the
//! submitted eye textures. Only indices, handles, and fixed-max inline
//! arrays cross this boundary; never pointers.
//!
//! Seqlock discipline: `frame_id` doubles as the sequence word. The
//! producer makes it odd before touching the frame fields and even (one
//! tick higher) when they are consistent again. Readers copy the fields
//! between two loads of `frame_id` and retry on odd or mismatched values.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::cell::UnsafeCell;
use std::mem;
use std::ptr::NonNull;
use std::sync::atomic::{fence, AtomicI64, AtomicU32, AtomicU64, Ordering};

use crate::messages::SessionState;
use crate::shared_memory::SharedMemory;
use crate::{Error, Result, PROTOCOL_VERSION};

/// Maximum tracked devices published in the frame plane.
pub const MAX_DEVICES: usize = 16;

/// Stereo: one view per eye.
pub const EYE_COUNT: usize = 2;

/// Device user paths are truncated to this length in the frame plane; the
/// full-length form only travels over the control channel.
pub const DEVICE_PATH_LEN: usize = 64;

pub const MAX_TEXTURE_WIDTH: u32 = 2048;
pub const MAX_TEXTURE_HEIGHT: u32 = 2048;
pub const TEXTURE_PIXEL_BYTES: usize = (MAX_TEXTURE_WIDTH * MAX_TEXTURE_HEIGHT * 4) as usize;

/// Position plus orientation quaternion (x, y, z, w).
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C)]
pub struct Pose {
    pub position: [f32; 3],
    pub orientation: [f32; 4],
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            orientation: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        position: [0.0; 3],
        orientation: [0.0, 0.0, 0.0, 1.0],
    };
}

/// Field of view half-angles in radians.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[repr(C)]
pub struct Fov {
    pub angle_left: f32,
    pub angle_right: f32,
    pub angle_up: f32,
    pub angle_down: f32,
}

/// Per-eye pose and field of view for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[repr(C)]
pub struct FrameView {
    pub pose: Pose,
    pub fov: Fov,
}

/// One tracked device slot.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct DeviceSlot {
    user_path: [u8; DEVICE_PATH_LEN],
    pub pose: Pose,
    pub is_active: u32,
}

impl Default for DeviceSlot {
    fn default() -> Self {
        Self {
            user_path: [0; DEVICE_PATH_LEN],
            pose: Pose::default(),
            is_active: 0,
        }
    }
}

impl DeviceSlot {
    pub fn new(user_path: &str, pose: Pose, is_active: bool) -> Self {
        let mut slot = Self {
            user_path: [0; DEVICE_PATH_LEN],
            pose,
            is_active: is_active as u32,
        };
        slot.set_user_path(user_path);
        slot
    }

    pub fn set_user_path(&mut self, path: &str) {
        self.user_path = [0; DEVICE_PATH_LEN];
        let bytes = path.as_bytes();
        let copy = bytes.len().min(DEVICE_PATH_LEN - 1);
        self.user_path[..copy].copy_from_slice(&bytes[..copy]);
    }

    pub fn user_path(&self) -> &str {
        let end = self
            .user_path
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(DEVICE_PATH_LEN);
        std::str::from_utf8(&self.user_path[..end]).unwrap_or("")
    }

    pub fn is_active(&self) -> bool {
        self.is_active != 0
    }
}

/// The data the producer publishes each tick, in plain owned form.
#[derive(Debug, Clone, Default)]
pub struct FrameSnapshot {
    pub frame_id: u64,
    pub predicted_display_time: i64,
    pub view_count: u32,
    pub views: [FrameView; EYE_COUNT],
    pub device_count: u32,
    pub devices: [DeviceSlot; MAX_DEVICES],
}

impl FrameSnapshot {
    /// Look up a device slot by its user path.
    pub fn device(&self, user_path: &str) -> Option<&DeviceSlot> {
        self.devices[..self.device_count.min(MAX_DEVICES as u32) as usize]
            .iter()
            .find(|slot| slot.user_path() == user_path)
    }
}

/// Hot-path frame fields, written by the service 90 times a second and
/// read by the client on every frame-wait and locate call.
#[repr(C, align(64))]
pub struct FrameState {
    frame_id: AtomicU64,
    predicted_display_time: AtomicI64,
    view_count: AtomicU32,
    device_count: AtomicU32,
    views: UnsafeCell<[FrameView; EYE_COUNT]>,
    devices: UnsafeCell<[DeviceSlot; MAX_DEVICES]>,
}

// Concurrent access to the UnsafeCell interiors is mediated by the
// frame_id seqlock; the single producer is the only writer.
unsafe impl Sync for FrameState {}

impl FrameState {
    /// Sequence word. Even values are consistent frames; the frame number
    /// is `frame_id / 2`.
    pub fn frame_id(&self) -> u64 {
        self.frame_id.load(Ordering::Acquire)
    }

    /// Latest predicted display time. Single-field read; never blocks and
    /// needs no seqlock retry.
    pub fn predicted_display_time(&self) -> i64 {
        self.predicted_display_time.load(Ordering::Acquire)
    }

    /// Publish one tick. Must only be called from the single producer.
    pub fn publish(
        &self,
        predicted_display_time: i64,
        views: &[FrameView; EYE_COUNT],
        devices: &[DeviceSlot],
    ) {
        let seq = self.frame_id.load(Ordering::Relaxed);
        debug_assert_eq!(seq % 2, 0, "producer re-entered mid-write");
        self.frame_id.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        unsafe {
            *self.views.get() = *views;
            let slots = &mut *self.devices.get();
            let count = devices.len().min(MAX_DEVICES);
            slots[..count].copy_from_slice(&devices[..count]);
            for slot in &mut slots[count..] {
                *slot = DeviceSlot::default();
            }
        }
        self.view_count.store(EYE_COUNT as u32, Ordering::Relaxed);
        self.device_count
            .store(devices.len().min(MAX_DEVICES) as u32, Ordering::Relaxed);
        self.predicted_display_time
            .store(predicted_display_time, Ordering::Relaxed);

        self.frame_id.store(seq.wrapping_add(2), Ordering::Release);
    }

    /// Copy a consistent view of the frame, retrying while the producer is
    /// mid-write.
    pub fn snapshot(&self) -> FrameSnapshot {
        loop {
            let before = self.frame_id.load(Ordering::Acquire);
            if before % 2 != 0 {
                std::hint::spin_loop();
                continue;
            }

            // volatile: the copy must happen between the two frame_id loads
            let snapshot = unsafe {
                FrameSnapshot {
                    frame_id: before,
                    predicted_display_time: self.predicted_display_time.load(Ordering::Relaxed),
                    view_count: self.view_count.load(Ordering::Relaxed),
                    views: std::ptr::read_volatile(self.views.get()),
                    device_count: self.device_count.load(Ordering::Relaxed),
                    devices: std::ptr::read_volatile(self.devices.get()),
                }
            };

            fence(Ordering::Acquire);
            if self.frame_id.load(Ordering::Relaxed) == before {
                return snapshot;
            }
            std::hint::spin_loop();
        }
    }
}

/// First page of the shared region: connection flags, session state, and
/// the frame. Scalar fields are atomics; ordered reads use acquire, ordered
/// writes release.
#[repr(C, align(4096))]
pub struct SharedData {
    protocol_version: AtomicU32,
    service_ready: AtomicU32,
    client_connected: AtomicU32,
    session_state: AtomicU32,
    active_session_handle: AtomicU64,
    frame: FrameState,
}

const _: () = assert!(mem::size_of::<SharedData>() == 4096);
const _: () = assert!(mem::align_of::<SharedData>() == 4096);
const _: () = assert!(mem::size_of::<FrameTexture>() % 4096 == 0);

impl SharedData {
    pub fn protocol_version(&self) -> u32 {
        self.protocol_version.load(Ordering::Acquire)
    }

    pub fn service_ready(&self) -> bool {
        self.service_ready.load(Ordering::Acquire) != 0
    }

    pub fn set_service_ready(&self, ready: bool) {
        self.service_ready.store(ready as u32, Ordering::Release);
    }

    pub fn client_connected(&self) -> bool {
        self.client_connected.load(Ordering::Acquire) != 0
    }

    pub fn set_client_connected(&self, connected: bool) {
        self.client_connected
            .store(connected as u32, Ordering::Release);
    }

    pub fn session_state(&self) -> SessionState {
        SessionState::from_u32(self.session_state.load(Ordering::Acquire))
            .unwrap_or(SessionState::Idle)
    }

    pub fn set_session_state(&self, state: SessionState) {
        self.session_state.store(state as u32, Ordering::Release);
    }

    pub fn active_session_handle(&self) -> u64 {
        self.active_session_handle.load(Ordering::Acquire)
    }

    pub fn set_active_session_handle(&self, handle: u64) {
        self.active_session_handle.store(handle, Ordering::Release);
    }

    pub fn frame(&self) -> &FrameState {
        &self.frame
    }
}

/// One submitted eye texture. Written by the client at frame end, drained
/// by the service. The `ready` flag is the publication point: the service
/// claims a texture by swapping `ready` from 1 to 0.
#[repr(C, align(4096))]
pub struct FrameTexture {
    width: AtomicU32,
    height: AtomicU32,
    format: AtomicU32,
    data_size: AtomicU32,
    ready: AtomicU32,
    _reserved: [u32; 3],
    pixel_data: UnsafeCell<[u8; TEXTURE_PIXEL_BYTES]>,
}

unsafe impl Sync for FrameTexture {}

/// Metadata for a claimed texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureInfo {
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub data_size: u32,
}

impl FrameTexture {
    pub fn ready(&self) -> bool {
        self.ready.load(Ordering::Acquire) != 0
    }

    /// Client side: publish one eye's pixels. Clamped to the fixed bound.
    pub fn publish(&self, width: u32, height: u32, format: u32, pixels: &[u8]) {
        self.ready.store(0, Ordering::Release);

        let len = pixels.len().min(TEXTURE_PIXEL_BYTES);
        unsafe {
            let dest = &mut *self.pixel_data.get();
            dest[..len].copy_from_slice(&pixels[..len]);
        }
        self.width.store(width, Ordering::Relaxed);
        self.height.store(height, Ordering::Relaxed);
        self.format.store(format, Ordering::Relaxed);
        self.data_size.store(len as u32, Ordering::Relaxed);

        self.ready.store(1, Ordering::Release);
    }

    /// Service side: claim a submitted texture if one is pending, copying
    /// its pixels into `out`. Clears `ready`.
    pub fn take(&self, out: &mut Vec<u8>) -> Option<TextureInfo> {
        if self
            .ready
            .compare_exchange(1, 0, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }

        let info = TextureInfo {
            width: self.width.load(Ordering::Relaxed),
            height: self.height.load(Ordering::Relaxed),
            format: self.format.load(Ordering::Relaxed),
            data_size: self
                .data_size
                .load(Ordering::Relaxed)
                .min(TEXTURE_PIXEL_BYTES as u32),
        };
        out.clear();
        unsafe {
            let src = &*self.pixel_data.get();
            out.extend_from_slice(&src[..info.data_size as usize]);
        }
        Some(info)
    }
}

#[derive(Debug)]
enum Backing {
    Shm(#[allow(dead_code)] SharedMemory),
    Heap { ptr: NonNull<u8>, layout: Layout },
}

/// The mapped frame plane: header page plus the two texture blocks.
///
/// The service `create`s it (and owns unlinking); the client `open`s it and
/// is refused on a protocol-version mismatch before any control-channel
/// traffic happens. `in_memory` gives tests the same layout on the heap.
#[derive(Debug)]
pub struct FramePlane {
    shared: NonNull<SharedData>,
    textures: NonNull<FrameTexture>,
    _backing: Backing,
}

unsafe impl Send for FramePlane {}
unsafe impl Sync for FramePlane {}

impl FramePlane {
    /// Total region size: header page plus one texture block per eye.
    pub const REGION_SIZE: usize =
        mem::size_of::<SharedData>() + EYE_COUNT * mem::size_of::<FrameTexture>();

    /// Service side: create and stamp a fresh region.
    pub fn create(name: &str) -> Result<Self> {
        let shm = SharedMemory::create(name, Self::REGION_SIZE)?;
        let plane = Self::from_base(shm.as_ptr(), Backing::Shm(shm))?;
        plane
            .shared()
            .protocol_version
            .store(PROTOCOL_VERSION, Ordering::Release);
        Ok(plane)
    }

    /// Client side: map the service's region and verify the version gate.
    pub fn open(name: &str) -> Result<Self> {
        let shm = SharedMemory::open(name, Self::REGION_SIZE)?;
        let plane = Self::from_base(shm.as_ptr(), Backing::Shm(shm))?;
        let found = plane.shared().protocol_version();
        if found != PROTOCOL_VERSION {
            return Err(Error::VersionMismatch {
                service: found,
                client: PROTOCOL_VERSION,
            });
        }
        Ok(plane)
    }

    /// Heap-backed plane with identical layout, for tests and in-process
    /// harnesses.
    pub fn in_memory() -> Self {
        let layout = Layout::from_size_align(Self::REGION_SIZE, mem::align_of::<SharedData>())
            .expect("static layout");
        // Zeroed bytes are a valid SharedData: atomics at zero, identity-free PODs.
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) })
            .unwrap_or_else(|| std::alloc::handle_alloc_error(layout));
        let plane = Self::from_base(ptr.as_ptr(), Backing::Heap { ptr, layout })
            .expect("heap layout is always aligned");
        plane
            .shared()
            .protocol_version
            .store(PROTOCOL_VERSION, Ordering::Release);
        plane
    }

    fn from_base(base: *mut u8, backing: Backing) -> Result<Self> {
        if base.align_offset(mem::align_of::<SharedData>()) != 0 {
            return Err(Error::MapFailed("region is not page-aligned".to_owned()));
        }
        let shared = NonNull::new(base.cast::<SharedData>())
            .ok_or(Error::MapFailed("null mapping".to_owned()))?;
        let textures = NonNull::new(unsafe {
            base.add(mem::size_of::<SharedData>()).cast::<FrameTexture>()
        })
        .ok_or(Error::MapFailed("null mapping".to_owned()))?;
        Ok(Self {
            shared,
            textures,
            _backing: backing,
        })
    }

    /// Unlink the named region so the next create starts clean.
    pub fn unlink(name: &str) {
        SharedMemory::unlink(name);
    }

    pub fn shared(&self) -> &SharedData {
        unsafe { self.shared.as_ref() }
    }

    pub fn texture(&self, eye: usize) -> &FrameTexture {
        assert!(eye < EYE_COUNT);
        unsafe { &*self.textures.as_ptr().add(eye) }
    }
}

impl Drop for FramePlane {
    fn drop(&mut self) {
        if let Backing::Heap { ptr, layout } = &self._backing {
            unsafe { dealloc(ptr.as_ptr(), *layout) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_data_fits_one_page() {
        assert_eq!(mem::size_of::<SharedData>(), 4096);
    }

    #[test]
    fn in_memory_plane_starts_idle() {
        let plane = FramePlane::in_memory();
        let shared = plane.shared();
        assert_eq!(shared.protocol_version(), PROTOCOL_VERSION);
        assert!(!shared.service_ready());
        assert!(!shared.client_connected());
        assert_eq!(shared.session_state(), SessionState::Idle);
        assert_eq!(shared.active_session_handle(), 0);
        assert_eq!(shared.frame().frame_id(), 0);
    }

    #[test]
    fn publish_and_snapshot_round_trip() {
        let plane = FramePlane::in_memory();
        let frame = plane.shared().frame();

        let mut views = [FrameView::default(); EYE_COUNT];
        views[0].pose.position = [0.1, 1.6, -0.2];
        views[1].pose.position = [0.2, 1.6, -0.2];
        let devices = [
            DeviceSlot::new("/user/head", Pose::IDENTITY, true),
            DeviceSlot::new("/user/hand/left", Pose::IDENTITY, false),
        ];
        frame.publish(42, &views, &devices);

        let snapshot = frame.snapshot();
        assert_eq!(snapshot.frame_id, 2);
        assert_eq!(snapshot.predicted_display_time, 42);
        assert_eq!(snapshot.view_count, EYE_COUNT as u32);
        assert_eq!(snapshot.device_count, 2);
        assert_eq!(snapshot.views[0].pose.position, [0.1, 1.6, -0.2]);
        assert_eq!(snapshot.device("/user/head").map(|d| d.is_active()), Some(true));
        assert!(snapshot.device("/user/hand/left").is_some());
        assert!(snapshot.device("/user/hand/right").is_none());
    }

    #[test]
    fn stale_device_slots_are_cleared() {
        let plane = FramePlane::in_memory();
        let frame = plane.shared().frame();
        let views = [FrameView::default(); EYE_COUNT];

        let many: Vec<DeviceSlot> = (0..4)
            .map(|i| DeviceSlot::new(&format!("/user/device/{i}"), Pose::IDENTITY, true))
            .collect();
        frame.publish(1, &views, &many);
        frame.publish(2, &views, &many[..1]);

        let snapshot = frame.snapshot();
        assert_eq!(snapshot.device_count, 1);
        assert_eq!(snapshot.devices[1].user_path(), "");
    }

    #[test]
    fn texture_publish_take_cycle() {
        let plane = FramePlane::in_memory();
        let texture = plane.texture(0);
        assert!(!texture.ready());

        let pixels = vec![0x7F_u8; 16];
        texture.publish(2, 2, 1, &pixels);
        assert!(texture.ready());

        let mut out = Vec::new();
        let info = texture.take(&mut out).unwrap();
        assert_eq!(
            info,
            TextureInfo {
                width: 2,
                height: 2,
                format: 1,
                data_size: 16
            }
        );
        assert_eq!(out, pixels);

        // claimed: a second take sees nothing until the next publish
        assert!(texture.take(&mut out).is_none());
        assert!(!texture.ready());
    }

    #[cfg(unix)]
    #[test]
    fn open_refuses_protocol_version_mismatch() {
        let name = format!("ox_plane_gate_{}", std::process::id());
        FramePlane::unlink(&name);

        {
            let plane = FramePlane::create(&name).unwrap();
            plane
                .shared()
                .protocol_version
                .store(PROTOCOL_VERSION + 1, Ordering::Release);

            match FramePlane::open(&name) {
                Err(Error::VersionMismatch { service, client }) => {
                    assert_eq!(service, PROTOCOL_VERSION + 1);
                    assert_eq!(client, PROTOCOL_VERSION);
                }
                other => panic!("expected version mismatch, got {other:?}"),
            }
        }
        FramePlane::unlink(&name);
    }

    #[cfg(unix)]
    #[test]
    fn create_then_open_shares_state() {
        let name = format!("ox_plane_share_{}", std::process::id());
        FramePlane::unlink(&name);

        let service_side = FramePlane::create(&name).unwrap();
        service_side.shared().set_service_ready(true);
        service_side
            .shared()
            .frame()
            .publish(5, &[FrameView::default(); EYE_COUNT], &[]);

        let client_side = FramePlane::open(&name).unwrap();
        assert!(client_side.shared().service_ready());
        assert_eq!(client_side.shared().frame().snapshot().predicted_display_time, 5);

        client_side.shared().set_client_connected(true);
        assert!(service_side.shared().client_connected());

        drop(client_side);
        drop(service_side);
        FramePlane::unlink(&name);
    }

    #[test]
    fn device_path_truncates_at_slot_width() {
        let long = "/user/".to_string() + &"x".repeat(DEVICE_PATH_LEN * 2);
        let slot = DeviceSlot::new(&long, Pose::IDENTITY, true);
        assert_eq!(slot.user_path().len(), DEVICE_PATH_LEN - 1);
    }
}
