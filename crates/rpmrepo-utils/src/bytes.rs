/// Formats a number of bytes into a human-readable string with binary units.
///
/// # Example
///
/// ```
/// use rpmrepo_utils::bytes::format_bytes;
///
/// assert_eq!(format_bytes(1024_u64.pow(2), 2), "1.00 MiB");
/// ```
pub fn format_bytes(bytes: u64, precision: usize) -> String {
    const SIZES: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

    let mut value = bytes as f64;
    let mut idx = 0;
    while value >= 1024.0 && idx < SIZES.len() - 1 {
        value /= 1024.0;
        idx += 1;
    }

    format!("{:.*} {}", precision, value, SIZES[idx])
}
