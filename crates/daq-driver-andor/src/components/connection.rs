//! Andor SDK3 Connection Management
//!
//! Handles library initialisation, camera opening/closing, and resource cleanup.
//!
//! ## Library Reference Counting
//!
//! `AT_InitialiseLibrary` / `AT_FinaliseLibrary` affect the whole process. An
//! [`SdkContext`] counts the sessions using a library: the first
//! [`SdkContext::acquire`] initialises it, the last [`SdkContext::release`]
//! finalises it. Sessions share one context through an `Arc`.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::components::features::CAMERA_MODEL;
use crate::components::sdk::{Sdk3Device, Sdk3Library};
use crate::error::{AndorError, Result};

/// Reference-counted lifecycle of one SDK3 library instance.
pub struct SdkContext {
    library: Arc<dyn Sdk3Library>,
    users: Mutex<usize>,
}

impl SdkContext {
    /// Context over a library that is not initialised yet.
    pub fn new(library: Arc<dyn Sdk3Library>) -> Arc<Self> {
        Arc::new(Self {
            library,
            users: Mutex::new(0),
        })
    }

    /// Register a user, initialising the library on the first one.
    pub fn acquire(&self) -> Result<()> {
        let mut users = self.users.lock();
        if *users == 0 {
            self.library.initialise()?;
            tracing::info!("Andor SDK3 initialised (users: 1)");
        } else {
            tracing::debug!(users = *users + 1, "Andor SDK3 already initialised");
        }
        *users += 1;
        Ok(())
    }

    /// Drop a user, finalising the library when it was the last one.
    pub fn release(&self) {
        let mut users = self.users.lock();
        match *users {
            0 => tracing::error!("Andor SDK3 release without matching acquire"),
            1 => {
                *users = 0;
                if let Err(e) = self.library.finalise() {
                    tracing::warn!(error = %e, "AT_FinaliseLibrary failed");
                } else {
                    tracing::info!("Andor SDK3 finalised (last user released)");
                }
            }
            n => {
                *users = n - 1;
                tracing::debug!(users = n - 1, "Andor SDK3 still in use");
            }
        }
    }

    /// Number of active users.
    pub fn users(&self) -> usize {
        *self.users.lock()
    }

    /// Wrapped library.
    pub fn library(&self) -> &Arc<dyn Sdk3Library> {
        &self.library
    }
}

/// One opened camera. Holds a context reference for as long as it is open.
pub struct AndorConnection {
    context: Arc<SdkContext>,
    device: Option<Arc<dyn Sdk3Device>>,
    index: usize,
}

impl AndorConnection {
    /// Open camera `index`.
    pub fn open(context: Arc<SdkContext>, index: usize) -> Result<Self> {
        context.acquire()?;
        match Self::open_device(&context, index) {
            Ok(device) => {
                tracing::info!(index, "Andor camera opened");
                Ok(Self {
                    context,
                    device: Some(device),
                    index,
                })
            }
            Err(e) => {
                context.release();
                Err(e)
            }
        }
    }

    fn open_device(context: &SdkContext, index: usize) -> Result<Arc<dyn Sdk3Device>> {
        let count = context.library().device_count()?;
        if index >= count {
            return Err(AndorError::invalid_state(format!(
                "camera index {index} out of range ({count} detected)"
            )));
        }
        Ok(context.library().open(index)?)
    }

    /// Close the camera if open. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.device.take().is_some() {
            tracing::info!(index = self.index, "Andor camera closed");
            self.context.release();
        }
    }

    /// Whether the device handle is still held.
    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    /// Camera index this connection was opened with.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Handle of the opened camera.
    pub fn device(&self) -> Result<Arc<dyn Sdk3Device>> {
        self.device
            .clone()
            .ok_or_else(|| AndorError::invalid_state("camera is closed"))
    }

    /// Model names of every detected camera, in index order.
    pub fn list_cameras(context: &Arc<SdkContext>) -> Result<Vec<String>> {
        context.acquire()?;
        let result = (|| -> Result<Vec<String>> {
            let count = context.library().device_count()?;
            let mut cameras = Vec::with_capacity(count);
            for index in 0..count {
                let device = context.library().open(index)?;
                match device.get_string(CAMERA_MODEL) {
                    Ok(model) => cameras.push(model),
                    Err(e) => {
                        tracing::warn!(index, error = %e, "Failed to read camera model");
                        cameras.push(format!("camera {index}"));
                    }
                }
            }
            Ok(cameras)
        })();
        context.release();
        result
    }
}

impl Drop for AndorConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::components::mock::MockSdk3Library;

    #[test]
    fn test_context_initialises_once() {
        let library = Arc::new(MockSdk3Library::new(2));
        let context = SdkContext::new(library.clone());

        let first = AndorConnection::open(context.clone(), 0).unwrap();
        let second = AndorConnection::open(context.clone(), 1).unwrap();
        assert_eq!(context.users(), 2);
        assert_eq!(library.initialise_calls(), 1);

        drop(first);
        assert!(library.is_initialised());
        drop(second);
        assert_eq!(context.users(), 0);
        assert!(!library.is_initialised());
    }

    #[test]
    fn test_open_out_of_range_releases_context() {
        let context = SdkContext::new(Arc::new(MockSdk3Library::new(1)));
        assert!(AndorConnection::open(context.clone(), 3).is_err());
        assert_eq!(context.users(), 0);
    }

    #[test]
    fn test_close_is_idempotent() {
        let context = SdkContext::new(Arc::new(MockSdk3Library::new(1)));
        let mut conn = AndorConnection::open(context.clone(), 0).unwrap();
        assert!(conn.device().is_ok());
        conn.close();
        conn.close();
        assert!(!conn.is_open());
        assert!(conn.device().is_err());
        assert_eq!(context.users(), 0);
    }

    #[test]
    fn test_list_cameras() {
        let context = SdkContext::new(Arc::new(MockSdk3Library::new(2)));
        let cameras = AndorConnection::list_cameras(&context).unwrap();
        assert_eq!(cameras.len(), 2);
        assert!(cameras.iter().all(|model| model.starts_with("SIMCAM")));
        assert_eq!(context.users(), 0);
    }
}
