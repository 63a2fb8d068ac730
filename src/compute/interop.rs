use super::backend::BufferHandle;
use crate::error::GpuError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ownership {
    Display,
    Compute,
}

/// Display buffer shared between compute dispatches and the present pass.
#[derive(Debug)]
pub struct DisplayInterop {
    buffer: BufferHandle,
    width: u32,
    height: u32,
    owner: Ownership,
}

impl DisplayInterop {
    pub fn new(buffer: BufferHandle, width: u32, height: u32) -> Self {
        Self { buffer, width, height, owner: Ownership::Display }
    }

    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_acquired(&self) -> bool {
        self.owner == Ownership::Compute
    }

    pub fn acquire(&mut self) -> Result<BufferHandle, GpuError> {
        if self.is_acquired() {
            return Err(GpuError::Interop("display buffer acquired twice"));
        }
        self.owner = Ownership::Compute;
        Ok(self.buffer)
    }

    pub fn release(&mut self) -> Result<(), GpuError> {
        if !self.is_acquired() {
            return Err(GpuError::Interop("display buffer released without acquire"));
        }
        self.owner = Ownership::Display;
        Ok(())
    }

    /// Buffer to present from. Refused while compute owns it.
    pub fn presentable(&self) -> Result<BufferHandle, GpuError> {
        if self.is_acquired() {
            return Err(GpuError::Interop("present requested while compute holds the display buffer"));
        }
        Ok(self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_release_cycle() {
        let mut interop = DisplayInterop::new(BufferHandle(3), 4, 2);
        assert_eq!(interop.presentable().unwrap(), BufferHandle(3));
        assert_eq!(interop.acquire().unwrap(), BufferHandle(3));
        assert!(interop.acquire().is_err());
        assert!(interop.presentable().is_err());
        interop.release().unwrap();
        assert!(interop.release().is_err());
        assert!(interop.presentable().is_ok());
    }
}
