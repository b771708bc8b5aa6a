//! Latest-value snapshot bus.
//!
//! Link services are separate processes: the receive loop publishes
//! decoded records and status, displays and controllers read whatever
//! is newest. Only the latest value matters, so the bus is a named
//! slot, not a queue. [`MemoryBus`] backs tests and the simulator;
//! [`ShmBus`] maps POSIX shared memory so readers survive writer
//! restarts and never block the hot path.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::RadioError;

pub trait SnapshotBus: Send + Sync {
    fn publish(&self, name: &str, bytes: &[u8]) -> Result<(), RadioError>;
    fn read_latest(&self, name: &str) -> Result<Option<Vec<u8>>, RadioError>;
}

pub fn publish<T: Serialize>(
    bus: &dyn SnapshotBus,
    name: &str,
    value: &T,
) -> Result<(), RadioError> {
    let bytes = bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| RadioError::Snapshot(e.to_string()))?;
    bus.publish(name, &bytes)
}

pub fn read_latest<T: DeserializeOwned>(
    bus: &dyn SnapshotBus,
    name: &str,
) -> Result<Option<T>, RadioError> {
    match bus.read_latest(name)? {
        Some(bytes) => {
            let (value, _) =
                bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                    .map_err(|e| RadioError::Snapshot(e.to_string()))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// In-process bus for tests and the simulator.
#[derive(Default)]
pub struct MemoryBus {
    slots: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotBus for MemoryBus {
    fn publish(&self, name: &str, bytes: &[u8]) -> Result<(), RadioError> {
        self.slots
            .lock()
            .map_err(|_| RadioError::Snapshot("bus lock poisoned".into()))?
            .insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn read_latest(&self, name: &str) -> Result<Option<Vec<u8>>, RadioError> {
        Ok(self
            .slots
            .lock()
            .map_err(|_| RadioError::Snapshot("bus lock poisoned".into()))?
            .get(name)
            .cloned())
    }
}

#[cfg(target_os = "linux")]
pub use shm::ShmBus;

#[cfg(target_os = "linux")]
mod shm {
    //! Lock-free shared-memory slot.
    //!
    //! Layout per named region: a header followed by four copies of the
    //! value. The writer rotates through the copies and bumps the
    //! header index last; a reader picks the copy the index points at
    //! and re-checks the per-copy index after copying out, retrying if
    //! the writer lapped it mid-read. Four copies make a lap during one
    //! read practically impossible at our publish rates.

    use std::collections::HashMap;
    use std::ffi::CString;
    use std::sync::atomic::{fence, AtomicU32, Ordering};
    use std::sync::Mutex;

    use super::SnapshotBus;
    use crate::RadioError;

    const MAGIC: u64 = 0x5348_4d5f_4441_5441; // "SHM_DATA"
    const COPIES: usize = 4;
    const MAX_VALUE: usize = 4096;
    const HEADER_LEN: usize = 16; // magic u64, capacity u32, index u32
    const COPY_HEADER_LEN: usize = 8; // index u32, length u32
    const COPY_STRIDE: usize = COPY_HEADER_LEN + MAX_VALUE;
    const REGION_LEN: usize = HEADER_LEN + COPIES * COPY_STRIDE;

    struct Mapping {
        base: *mut u8,
    }

    // raw mapping pointer, only dereferenced through atomics/copies
    unsafe impl Send for Mapping {}

    impl Drop for Mapping {
        fn drop(&mut self) {
            unsafe {
                libc::munmap(self.base.cast(), REGION_LEN);
            }
        }
    }

    /// Snapshot bus over POSIX shared memory (`/dev/shm`). Regions are
    /// named `/<prefix>.<slot>` and created on first use by either
    /// side.
    pub struct ShmBus {
        prefix: String,
        mappings: Mutex<HashMap<String, Mapping>>,
    }

    impl ShmBus {
        pub fn new(prefix: &str) -> Self {
            Self {
                prefix: prefix.to_string(),
                mappings: Mutex::new(HashMap::new()),
            }
        }

        fn map(&self, name: &str) -> Result<*mut u8, RadioError> {
            let mut mappings = self
                .mappings
                .lock()
                .map_err(|_| RadioError::Snapshot("bus lock poisoned".into()))?;
            if let Some(m) = mappings.get(name) {
                return Ok(m.base);
            }

            let shm_name = CString::new(format!("/{}.{}", self.prefix, name))
                .map_err(|_| RadioError::Snapshot("bad slot name".into()))?;
            let base = unsafe {
                let fd = libc::shm_open(
                    shm_name.as_ptr(),
                    libc::O_RDWR | libc::O_CREAT,
                    0o666 as libc::mode_t,
                );
                if fd < 0 {
                    return Err(std::io::Error::last_os_error().into());
                }
                if libc::ftruncate(fd, REGION_LEN as libc::off_t) < 0 {
                    let err = std::io::Error::last_os_error();
                    libc::close(fd);
                    return Err(err.into());
                }
                let ptr = libc::mmap(
                    std::ptr::null_mut(),
                    REGION_LEN,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED,
                    fd,
                    0,
                );
                libc::close(fd);
                if ptr == libc::MAP_FAILED {
                    return Err(std::io::Error::last_os_error().into());
                }
                ptr.cast::<u8>()
            };

            unsafe {
                let magic = base.cast::<u64>();
                if magic.read_volatile() != MAGIC {
                    base.add(8).cast::<u32>().write_volatile(MAX_VALUE as u32);
                    magic.write_volatile(MAGIC);
                }
            }
            mappings.insert(name.to_string(), Mapping { base });
            Ok(base)
        }

        unsafe fn index(base: *mut u8) -> &'static AtomicU32 {
            &*base.add(12).cast::<AtomicU32>()
        }

        unsafe fn copy_at(base: *mut u8, idx: u32) -> *mut u8 {
            base.add(HEADER_LEN + (idx as usize % COPIES) * COPY_STRIDE)
        }
    }

    impl SnapshotBus for ShmBus {
        fn publish(&self, name: &str, bytes: &[u8]) -> Result<(), RadioError> {
            if bytes.len() > MAX_VALUE {
                return Err(RadioError::Snapshot(format!(
                    "value of {} bytes exceeds slot capacity {}",
                    bytes.len(),
                    MAX_VALUE
                )));
            }
            let base = self.map(name)?;
            unsafe {
                let index = Self::index(base);
                let next = index.load(Ordering::Relaxed).wrapping_add(1);
                let copy = Self::copy_at(base, next);
                copy.cast::<u32>().write_volatile(next);
                copy.add(4).cast::<u32>().write_volatile(bytes.len() as u32);
                std::ptr::copy_nonoverlapping(
                    bytes.as_ptr(),
                    copy.add(COPY_HEADER_LEN),
                    bytes.len(),
                );
                fence(Ordering::Release);
                index.store(next, Ordering::Release);
            }
            Ok(())
        }

        fn read_latest(&self, name: &str) -> Result<Option<Vec<u8>>, RadioError> {
            let base = self.map(name)?;
            unsafe {
                let index = Self::index(base);
                for _ in 0..3 {
                    let idx = index.load(Ordering::Acquire);
                    if idx == 0 {
                        return Ok(None);
                    }
                    let copy = Self::copy_at(base, idx);
                    let len = copy.add(4).cast::<u32>().read_volatile() as usize;
                    if len > MAX_VALUE {
                        return Err(RadioError::Snapshot("corrupt slot length".into()));
                    }
                    let mut out = vec![0u8; len];
                    std::ptr::copy_nonoverlapping(copy.add(COPY_HEADER_LEN), out.as_mut_ptr(), len);
                    fence(Ordering::Acquire);
                    if copy.cast::<u32>().read_volatile() == idx {
                        return Ok(Some(out));
                    }
                    // writer lapped us, take the newer copy
                }
                Err(RadioError::Snapshot("reader starved by writer".into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Probe {
        x: u32,
        label: String,
    }

    #[test]
    fn memory_bus_returns_latest_value() {
        let bus = MemoryBus::new();
        assert!(read_latest::<Probe>(&bus, "probe").unwrap().is_none());

        publish(
            &bus,
            "probe",
            &Probe {
                x: 1,
                label: "old".into(),
            },
        )
        .unwrap();
        publish(
            &bus,
            "probe",
            &Probe {
                x: 2,
                label: "new".into(),
            },
        )
        .unwrap();
        let got = read_latest::<Probe>(&bus, "probe").unwrap().unwrap();
        assert_eq!(
            got,
            Probe {
                x: 2,
                label: "new".into()
            }
        );
    }

    #[test]
    fn slots_are_independent() {
        let bus = MemoryBus::new();
        publish(&bus, "a", &1u32).unwrap();
        publish(&bus, "b", &2u32).unwrap();
        assert_eq!(read_latest::<u32>(&bus, "a").unwrap(), Some(1));
        assert_eq!(read_latest::<u32>(&bus, "b").unwrap(), Some(2));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn shm_bus_round_trips_across_instances() {
        let prefix = format!("rovercast-test-{}", std::process::id());
        let writer = ShmBus::new(&prefix);
        let reader = ShmBus::new(&prefix);
        publish(&writer, "status", &Probe {
            x: 7,
            label: "shm".into(),
        })
        .unwrap();
        let got = read_latest::<Probe>(&reader, "status").unwrap().unwrap();
        assert_eq!(got.x, 7);
        assert_eq!(got.label, "shm");
    }
}
