//! How many minutes of footage fit on the output volume.

use std::path::Path;

pub const GIB: u64 = 1024 * 1024 * 1024;
pub const GB: u64 = 1_000_000_000;
pub const YUV420_BITS_PER_PIXEL: f64 = 12.0;

/// Minutes until `bytes` fill up at a constant `bitrate_bps`.
pub fn minutes_until_full_compressed(bytes: u64, bitrate_bps: u64) -> f64 {
    if bitrate_bps == 0 {
        return f64::INFINITY;
    }
    let seconds = (bytes as f64 * 8.0) / bitrate_bps as f64;
    seconds / 60.0
}

/// Minutes until `bytes` fill up with raw frames
/// (24 bits per pixel for RGB24, about 12 for YUV420).
pub fn minutes_until_full_uncompressed(
    bytes: u64,
    width: u32,
    height: u32,
    fps: f64,
    bits_per_pixel: f64,
) -> f64 {
    let bytes_per_second = f64::from(width) * f64::from(height) * (bits_per_pixel / 8.0) * fps;
    if bytes_per_second <= 0.0 {
        return f64::INFINITY;
    }
    bytes as f64 / bytes_per_second / 60.0
}

/// Bytes available to unprivileged users on the filesystem holding `path`.
#[cfg(unix)]
pub fn available_bytes(path: &Path) -> std::io::Result<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    // SAFETY: `statvfs` is plain old data, fully written by the call on success.
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: `c_path` is NUL-terminated and `stat` is a valid out pointer.
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }

    #[allow(clippy::unnecessary_cast)]
    let free = stat.f_bavail as u64 * stat.f_frsize as u64;
    Ok(free)
}

#[cfg(not(unix))]
pub fn available_bytes(_path: &Path) -> std::io::Result<u64> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "free space query not supported on this platform",
    ))
}

/// One line summary, e.g. `42.0 GiB free, about 573 min at 10.0 Mbps`.
pub fn describe_budget(bytes: u64, total_bitrate_bps: u64) -> String {
    let minutes = minutes_until_full_compressed(bytes, total_bitrate_bps);
    format!(
        "{:.1} GiB free, about {:.0} min at {:.1} Mbps",
        bytes as f64 / GIB as f64,
        minutes,
        total_bitrate_bps as f64 / 1_000_000.0
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compressed_80_gib_at_10_mbps() {
        let minutes = minutes_until_full_compressed(80 * GIB, 10_000_000);
        assert!((minutes - 1145.32).abs() < 0.01, "got {minutes}");
    }

    #[test]
    fn test_compressed_decimal_units_are_smaller() {
        let gib = minutes_until_full_compressed(80 * GIB, 10_000_000);
        let gb = minutes_until_full_compressed(80 * GB, 10_000_000);
        assert!(gb < gib);
        assert!((gb - 1066.67).abs() < 0.01, "got {gb}");
    }

    #[test]
    fn test_uncompressed_rgb24_full_hd() {
        let minutes = minutes_until_full_uncompressed(80 * GIB, 1920, 1080, 10.0, 24.0);
        assert!((minutes - 23.01).abs() < 0.01, "got {minutes}");

        let yuv = minutes_until_full_uncompressed(80 * GIB, 1920, 1080, 10.0, 12.0);
        assert!((yuv - 2.0 * minutes).abs() < 1e-9);
    }

    #[test]
    fn test_zero_rates_never_fill() {
        assert!(minutes_until_full_compressed(GIB, 0).is_infinite());
        assert!(minutes_until_full_uncompressed(GIB, 0, 1080, 10.0, 24.0).is_infinite());
    }

    #[test]
    fn test_describe_budget() {
        assert_eq!(
            describe_budget(80 * GIB, 10_000_000),
            "80.0 GiB free, about 1145 min at 10.0 Mbps"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_available_bytes_on_temp_dir() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(available_bytes(tmp.path()).is_ok());
    }
}
