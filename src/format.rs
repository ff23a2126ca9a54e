/// Insert commas every 3 digits of the integer magnitude, keeping the sign.
///
/// Amounts coming off the portal are whole yen, so there is no fractional
/// part to carry.
pub fn group_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let len = digits.len();

    let mut out = String::with_capacity(len + len / 3 + 1);
    if value < 0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        out.push(ch);
        let remaining = len - (i + 1);
        if remaining > 0 && remaining % 3 == 0 {
            out.push(',');
        }
    }
    out
}

/// Format a yen amount for the report, e.g. `1,234円`.
pub fn format_yen(value: i64) -> String {
    format!("{}円", group_thousands(value))
}
