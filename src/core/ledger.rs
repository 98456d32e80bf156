use super::tax_table::TaxTable;

/// One contribution tranche, compounded and taxed independently of the others.
#[derive(Debug, Clone, PartialEq)]
pub struct Lot {
    pub current_value: f64,
    pub tax_basis: f64,
    pub origin_month: u32,
}

impl Lot {
    pub fn holding_months(&self, month: u32) -> u32 {
        month.saturating_sub(self.origin_month)
    }

    pub fn unrealized_gain(&self) -> f64 {
        self.current_value - self.tax_basis
    }

    /// Debits tax on the gain above basis. A non-positive gain is neither taxed
    /// nor refunded, and leaves the basis where it was.
    fn settle(&mut self, month: u32, table: TaxTable, reset_basis: bool) -> f64 {
        let gain = self.unrealized_gain();
        if gain <= 0.0 {
            return 0.0;
        }
        let tax = gain * table.rate(self.holding_months(month));
        self.current_value -= tax;
        if reset_basis {
            self.tax_basis = self.current_value;
        }
        tax
    }
}

/// Append-only, chronologically ordered collection of lots for one run.
#[derive(Debug, Clone, Default)]
pub struct LotLedger {
    lots: Vec<Lot>,
}

impl LotLedger {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lots: Vec::with_capacity(capacity),
        }
    }

    /// Zero-amount lots never carry gain, so they are not stored.
    pub fn append_lot(&mut self, amount: f64, origin_month: u32) {
        if amount == 0.0 {
            return;
        }
        self.lots.push(Lot {
            current_value: amount,
            tax_basis: amount,
            origin_month,
        });
    }

    pub fn grow_all(&mut self, monthly_rate: f64) {
        let factor = 1.0 + monthly_rate;
        for lot in &mut self.lots {
            lot.current_value *= factor;
        }
    }

    /// Taxes every lot at `month`; returns the total collected.
    pub fn apply_tax(&mut self, month: u32, table: TaxTable, reset_basis: bool) -> f64 {
        self.apply_tax_where(month, table, reset_basis, |_| true)
    }

    /// Taxes only the lots whose holding period at `month` satisfies `due`.
    pub fn apply_tax_where<F>(
        &mut self,
        month: u32,
        table: TaxTable,
        reset_basis: bool,
        mut due: F,
    ) -> f64
    where
        F: FnMut(u32) -> bool,
    {
        let mut collected = 0.0;
        for lot in &mut self.lots {
            if due(lot.holding_months(month)) {
                collected += lot.settle(month, table, reset_basis);
            }
        }
        collected
    }

    pub fn total_value(&self) -> f64 {
        self.lots.iter().map(|lot| lot.current_value).sum()
    }

    pub fn lots(&self) -> &[Lot] {
        &self.lots
    }

    pub(crate) fn len(&self) -> usize {
        self.lots.len()
    }
}
