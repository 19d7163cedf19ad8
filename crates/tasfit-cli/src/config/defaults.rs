pub struct DefaultsConfig {
    pub counts_column: &'static str,
    pub monitor_column: &'static str,
    pub max_calls: usize,
    pub tolerance: f64,
    pub patience: usize,
    pub error_strategy: u8,
    pub quadrature_order: usize,
    pub monte_carlo_samples: usize,
    pub seed: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            counts_column: "counts",
            monitor_column: "monitor",
            max_calls: 2000,
            tolerance: 1e-6,
            patience: 20,
            error_strategy: 1,
            quadrature_order: 3,
            monte_carlo_samples: 100,
            seed: 0,
        }
    }
}
