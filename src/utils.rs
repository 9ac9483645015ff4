//! Utility functions for file names and disk space

use std::path::Path;

/// Longest file name component produced by [`sanitize_filename`], in characters
///
/// ext4 allows 255 bytes; 15 are left for suffixes such as `.part`.
const MAX_FILENAME_CHARS: usize = 240;

/// Turn an arbitrary title into a single valid path component
///
/// Control characters and characters FAT or Windows reject (`"*/:<>?\|`) become
/// `_`. Leading and trailing dots and spaces are trimmed, so a name can never
/// be `.` or `..`. An empty result becomes `invalid`.
///
/// # Examples
///
/// ```
/// use novel_dl::utils::sanitize_filename;
///
/// assert_eq!(sanitize_filename("Re:Zero / Arc 1"), "Re_Zero _ Arc 1");
/// assert_eq!(sanitize_filename("  ..  "), "invalid");
/// ```
pub fn sanitize_filename(name: &str) -> String {
    let trimmed = name.trim_matches(|c| c == '.' || c == ' ');
    if trimmed.is_empty() {
        return "invalid".to_string();
    }

    trimmed
        .chars()
        .map(|c| if is_valid_filename_char(c) { c } else { '_' })
        .take(MAX_FILENAME_CHARS)
        .collect()
}

fn is_valid_filename_char(c: char) -> bool {
    !(c.is_control() || matches!(c, '"' | '*' | '/' | ':' | '<' | '>' | '?' | '\\' | '|'))
}

/// Get available disk space for a given path
///
/// Returns the number of bytes available to unprivileged users on the
/// filesystem containing `path`. The path must exist.
///
/// # Errors
///
/// Returns an error if the path doesn't exist or the platform call fails.
pub fn get_available_space(path: &Path) -> std::io::Result<u64> {
    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        // SAFETY: c_path is a valid, null-terminated C string; stat is zeroed
        // before the call and only read after it succeeds.
        unsafe {
            let mut stat: libc::statvfs = std::mem::zeroed();
            if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
                return Err(std::io::Error::last_os_error());
            }

            // f_bavail is available blocks for unprivileged users
            #[allow(clippy::unnecessary_cast)]
            let available_bytes = (stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64);
            Ok(available_bytes)
        }
    }

    #[cfg(windows)]
    {
        use std::os::windows::ffi::OsStrExt;
        use winapi::um::fileapi::GetDiskFreeSpaceExW;

        let wide_path: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        // SAFETY: wide_path is a valid, null-terminated wide string and all
        // output pointers point to live u64 values.
        unsafe {
            let mut free_bytes_available: u64 = 0;
            let mut _total_bytes: u64 = 0;
            let mut _total_free_bytes: u64 = 0;

            if GetDiskFreeSpaceExW(
                wide_path.as_ptr(),
                &mut free_bytes_available as *mut u64 as *mut _,
                &mut _total_bytes as *mut u64 as *mut _,
                &mut _total_free_bytes as *mut u64 as *mut _,
            ) == 0
            {
                return Err(std::io::Error::last_os_error());
            }

            Ok(free_bytes_available)
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "Disk space checking is not supported on this platform",
        ))
    }
}
