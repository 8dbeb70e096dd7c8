use tracing::warn;

/// Pricing knobs applied to every extracted product.
///
/// `discount_ratio` is the fraction of the original price that survives the
/// markdown (0.20 means the sale price starts at 20% of the original), and
/// `minimum_sale_price` is a hard floor in currency units.
#[derive(Debug, Clone, Copy)]
pub struct PricingConfig {
    pub discount_ratio: f64,
    pub minimum_sale_price: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            discount_ratio: 0.20,
            minimum_sale_price: 120.00,
        }
    }
}

impl PricingConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            discount_ratio: env_f64("DISCOUNT_RATIO", defaults.discount_ratio),
            minimum_sale_price: env_f64("MINIMUM_SALE_PRICE", defaults.minimum_sale_price),
        }
    }

    /// `sale = max(floor, original * ratio)`. Deterministic, no failure modes;
    /// malformed prices are coerced to 0 upstream and land on the floor here.
    pub fn sale_price(&self, original_price: f64) -> f64 {
        let discounted = original_price.max(0.0) * self.discount_ratio;
        discounted.max(self.minimum_sale_price)
    }
}

pub fn format_price(value: f64) -> String {
    format!("{value:.2}")
}

fn env_f64(key: &str, default: f64) -> f64 {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse::<f64>() {
            Ok(value) if value.is_finite() && value >= 0.0 => value,
            _ => {
                warn!(
                    target = "wooex.pricing",
                    key = key,
                    value = %raw,
                    "ignoring unparseable pricing override"
                );
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_dominates_below_threshold() {
        let config = PricingConfig::default();
        // 100 * 0.20 = 20, well under the 120 floor
        assert_eq!(config.sale_price(100.0), 120.0);
    }

    #[test]
    fn ratio_applies_above_threshold() {
        let config = PricingConfig::default();
        // 1000 * 0.20 = 200 >= 120
        assert_eq!(config.sale_price(1000.0), 200.0);
    }

    #[test]
    fn boundary_is_exact() {
        let config = PricingConfig::default();
        // 600 * 0.20 == 120.0 exactly; the floor and the ratio agree
        assert_eq!(config.sale_price(600.0), 120.0);
        // Just above the boundary the ratio wins; compare against the same
        // float product rather than a decimal literal.
        assert_eq!(config.sale_price(600.01), 600.01 * 0.20);
        assert!(config.sale_price(600.01) > 120.0);
    }

    #[test]
    fn zero_and_negative_prices_land_on_floor() {
        let config = PricingConfig::default();
        assert_eq!(config.sale_price(0.0), config.minimum_sale_price);
        assert_eq!(config.sale_price(-50.0), config.minimum_sale_price);
    }

    #[test]
    fn sale_never_exceeds_regular_when_regular_clears_floor() {
        let config = PricingConfig::default();
        for original in [600.0, 1000.0, 5000.0, 123456.78] {
            assert!(config.sale_price(original) <= original);
        }
    }

    #[test]
    fn formats_two_decimals() {
        assert_eq!(format_price(120.0), "120.00");
        assert_eq!(format_price(199.999), "200.00");
    }
}
