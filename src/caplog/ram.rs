use embedded_io::{Error, ErrorKind};
use heapless::Vec;

use super::{LogStore, OpenMode};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RamStoreError {
    /// The volume needs to be formatted first.
    NotMounted,
    NotFound,
    /// Writing requires the file to be open.
    NotOpen,
    OutOfSpace,
}
impl Error for RamStoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotMounted => ErrorKind::Other,
            Self::NotFound => ErrorKind::NotFound,
            Self::NotOpen => ErrorKind::InvalidInput,
            Self::OutOfSpace => ErrorKind::OutOfMemory,
        }
    }
}

/// A [LogStore] holding a single file of at most `N` bytes in RAM.
///
/// The contents are lost on reset, so this is mostly useful for testing and for boards without
/// a flash file system.
#[derive(Clone, Debug)]
pub struct RamStore<const N: usize> {
    data: Vec<u8, N>,
    exists: bool,
    is_open: bool,
    mounted: bool,
}
impl<const N: usize> RamStore<N> {
    /// A mounted volume without a log file.
    pub const fn new() -> Self {
        Self {
            data: Vec::new(),
            exists: false,
            is_open: false,
            mounted: true,
        }
    }
    /// A volume, that fails every operation until it's formatted.
    pub const fn unmounted() -> Self {
        Self {
            data: Vec::new(),
            exists: false,
            is_open: false,
            mounted: false,
        }
    }
    pub const fn is_open(&self) -> bool {
        self.is_open
    }
    pub fn contents(&self) -> Option<&[u8]> {
        self.exists.then_some(self.data.as_slice())
    }
    fn check_mounted(&self) -> Result<(), RamStoreError> {
        if self.mounted {
            Ok(())
        } else {
            Err(RamStoreError::NotMounted)
        }
    }
}
impl<const N: usize> Default for RamStore<N> {
    fn default() -> Self {
        Self::new()
    }
}
impl<const N: usize> LogStore for RamStore<N> {
    type Error = RamStoreError;

    fn open(&mut self, mode: OpenMode) -> Result<(), Self::Error> {
        self.check_mounted()?;
        if mode == OpenMode::Truncate || !self.exists {
            self.data.clear();
        }
        self.exists = true;
        self.is_open = true;
        Ok(())
    }
    fn close(&mut self) {
        self.is_open = false;
    }
    fn size(&mut self) -> Result<Option<u32>, Self::Error> {
        self.check_mounted()?;
        Ok(self.exists.then_some(self.data.len() as u32))
    }
    fn read_at(&mut self, offset: u32, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.check_mounted()?;
        if !self.exists {
            return Err(RamStoreError::NotFound);
        }
        let available = self.data.get(offset as usize..).unwrap_or(&[]);
        let read = available.len().min(buf.len());
        buf[..read].copy_from_slice(&available[..read]);
        Ok(read)
    }
    fn write_at(&mut self, offset: u32, data: &[u8]) -> Result<(), Self::Error> {
        self.check_mounted()?;
        if !self.is_open {
            return Err(RamStoreError::NotOpen);
        }
        let start = offset as usize;
        let end = start
            .checked_add(data.len())
            .ok_or(RamStoreError::OutOfSpace)?;
        if end > N {
            return Err(RamStoreError::OutOfSpace);
        }
        if end > self.data.len() {
            self.data
                .resize(end, 0)
                .map_err(|_| RamStoreError::OutOfSpace)?;
        }
        self.data[start..end].copy_from_slice(data);
        Ok(())
    }
    fn flush(&mut self) -> Result<(), Self::Error> {
        self.check_mounted()
    }
    fn remove(&mut self) -> Result<(), Self::Error> {
        self.check_mounted()?;
        self.data.clear();
        self.exists = false;
        self.is_open = false;
        Ok(())
    }
    fn format(&mut self) -> Result<(), Self::Error> {
        self.data.clear();
        self.exists = false;
        self.is_open = false;
        self.mounted = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overwrite_keeps_size() {
        let mut store = RamStore::<16>::new();
        store.open(OpenMode::Truncate).unwrap();
        store.write_at(0, &[1, 2, 3, 4]).unwrap();
        store.write_at(1, &[9]).unwrap();
        assert_eq!(store.size(), Ok(Some(4)));
        assert_eq!(store.contents(), Some(&[1, 9, 3, 4][..]));

        store.open(OpenMode::Update).unwrap();
        assert_eq!(store.size(), Ok(Some(4)));
        store.open(OpenMode::Truncate).unwrap();
        assert_eq!(store.size(), Ok(Some(0)));
    }

    #[test]
    fn errors() {
        let mut store = RamStore::<4>::new();
        assert_eq!(store.write_at(0, &[1]), Err(RamStoreError::NotOpen));
        assert_eq!(store.read_at(0, &mut [0; 1]), Err(RamStoreError::NotFound));
        store.open(OpenMode::Update).unwrap();
        assert_eq!(
            store.write_at(2, &[1, 2, 3]),
            Err(RamStoreError::OutOfSpace)
        );
        let mut store = RamStore::<4>::unmounted();
        assert_eq!(
            store.open(OpenMode::Update),
            Err(RamStoreError::NotMounted)
        );
    }
}
