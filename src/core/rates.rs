/// Effective monthly rate that compounds to `annual_rate` over twelve months.
pub fn monthly_rate(annual_rate: f64) -> f64 {
    (1.0 + annual_rate).powf(1.0 / 12.0) - 1.0
}

/// Inverse of [`monthly_rate`].
pub fn annual_rate(monthly_rate: f64) -> f64 {
    (1.0 + monthly_rate).powi(12) - 1.0
}
