/// Normalize a free-text price token into whole rupiah.
///
/// Internal whitespace is stripped, then everything that is not a digit is
/// dropped to obtain the magnitude. A literal "rb" or "k" anywhere in the
/// token (case-insensitive) multiplies it by 1000, so "12rb" and "12k" both
/// mean 12 000. Tokens without a single digit are not prices and yield
/// `None`; callers treat that as "not an expense", never as a user error.
pub fn parse_price(token: &str) -> Option<i64> {
    let token: String = token.chars().filter(|c| !c.is_whitespace()).collect();
    let digits: String = token.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    let value: i64 = digits.parse().ok()?;
    let lower = token.to_lowercase();
    if lower.contains("rb") || lower.contains('k') {
        value.checked_mul(1000)
    } else {
        Some(value)
    }
}
