//! Cost vectors and per-node cost tables

use serde::{Deserialize, Serialize};
use std::ops::{AddAssign, Index, Sub, SubAssign};

/// Index of a registered cost type
pub type CostType = usize;

/// Signed tree cost of a wire cost, saturating at `i64::MAX`
pub fn saturating_cost(cost: u64) -> i64 {
    i64::try_from(cost).unwrap_or(i64::MAX)
}

/// Unit a cost type is measured in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostUnit {
    #[default]
    Unknown,
    Tracepoint,
    /// Nanoseconds
    Time,
}

/// One value per registered cost type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemCost(Vec<i64>);

impl ItemCost {
    /// Zeroed cost vector for `num_types` cost types
    pub fn new(num_types: usize) -> Self {
        Self(vec![0; num_types])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when every slot is zero
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&cost| cost == 0)
    }

    /// Grow (never shrink) to `num_types` slots
    pub fn ensure_len(&mut self, num_types: usize) {
        if self.0.len() < num_types {
            self.0.resize(num_types, 0);
        }
    }

    /// Add to one slot, growing the vector when the type was registered later
    pub fn add(&mut self, cost_type: CostType, delta: i64) {
        self.ensure_len(cost_type + 1);
        self.0[cost_type] = self.0[cost_type].saturating_add(delta);
    }

    pub fn get(&self, cost_type: CostType) -> i64 {
        self.0.get(cost_type).copied().unwrap_or(0)
    }

    pub fn as_slice(&self) -> &[i64] {
        &self.0
    }
}

impl From<Vec<i64>> for ItemCost {
    fn from(costs: Vec<i64>) -> Self {
        Self(costs)
    }
}

impl Index<CostType> for ItemCost {
    type Output = i64;

    fn index(&self, cost_type: CostType) -> &i64 {
        &self.0[cost_type]
    }
}

impl AddAssign<&ItemCost> for ItemCost {
    fn add_assign(&mut self, rhs: &ItemCost) {
        assert_eq!(self.0.len(), rhs.0.len(), "cost vector length mismatch");
        for (lhs, rhs) in self.0.iter_mut().zip(&rhs.0) {
            *lhs = lhs.saturating_add(*rhs);
        }
    }
}

impl SubAssign<&ItemCost> for ItemCost {
    fn sub_assign(&mut self, rhs: &ItemCost) {
        assert_eq!(self.0.len(), rhs.0.len(), "cost vector length mismatch");
        for (lhs, rhs) in self.0.iter_mut().zip(&rhs.0) {
            *lhs = lhs.saturating_sub(*rhs);
        }
    }
}

impl Sub for &ItemCost {
    type Output = ItemCost;

    fn sub(self, rhs: &ItemCost) -> ItemCost {
        let mut out = self.clone();
        out -= rhs;
        out
    }
}

/// Accumulated cost per node id and cost type, plus totals per type.
///
/// `cost(t, id)` is zero for every id that was never added to.
#[derive(Debug, Clone, Default)]
pub struct Costs {
    type_names: Vec<String>,
    units: Vec<CostUnit>,
    costs: Vec<Vec<i64>>,
    totals: Vec<i64>,
}

impl Costs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new cost type and return its index
    pub fn add_type(&mut self, name: impl Into<String>, unit: CostUnit) -> CostType {
        self.type_names.push(name.into());
        self.units.push(unit);
        self.costs.push(Vec::new());
        self.totals.push(0);
        self.type_names.len() - 1
    }

    pub fn num_types(&self) -> usize {
        self.type_names.len()
    }

    pub fn type_name(&self, cost_type: CostType) -> &str {
        &self.type_names[cost_type]
    }

    pub fn unit(&self, cost_type: CostType) -> CostUnit {
        self.units[cost_type]
    }

    pub fn add(&mut self, cost_type: CostType, id: u32, delta: i64) {
        let costs = &mut self.costs[cost_type];
        let index = id as usize;
        if costs.len() <= index {
            costs.resize(index + 1, 0);
        }
        costs[index] = costs[index].saturating_add(delta);
    }

    pub fn cost(&self, cost_type: CostType, id: u32) -> i64 {
        self.costs
            .get(cost_type)
            .and_then(|costs| costs.get(id as usize))
            .copied()
            .unwrap_or(0)
    }

    /// All cost types for one id
    pub fn item_cost(&self, id: u32) -> ItemCost {
        ItemCost(
            (0..self.num_types())
                .map(|cost_type| self.cost(cost_type, id))
                .collect(),
        )
    }

    /// Add a full cost vector to one id
    pub fn add_item(&mut self, id: u32, cost: &ItemCost) {
        assert_eq!(cost.len(), self.num_types(), "cost vector length mismatch");
        for (cost_type, &delta) in cost.as_slice().iter().enumerate() {
            if delta != 0 {
                self.add(cost_type, id, delta);
            }
        }
    }

    pub fn add_total(&mut self, cost_type: CostType, delta: i64) {
        let total = &mut self.totals[cost_type];
        *total = total.saturating_add(delta);
    }

    pub fn total(&self, cost_type: CostType) -> i64 {
        self.totals.get(cost_type).copied().unwrap_or(0)
    }

    pub fn totals(&self) -> &[i64] {
        &self.totals
    }

    pub fn set_totals(&mut self, totals: &[i64]) {
        assert_eq!(totals.len(), self.num_types(), "cost vector length mismatch");
        self.totals = totals.to_vec();
    }

    pub fn clear_totals(&mut self) {
        self.totals.iter_mut().for_each(|total| *total = 0);
    }

    /// Copy the cost types and totals of `other`, without any per-id costs
    pub fn initialize_from(&mut self, other: &Costs) {
        self.type_names = other.type_names.clone();
        self.units = other.units.clone();
        self.costs = vec![Vec::new(); other.num_types()];
        self.totals = other.totals.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_cost_arithmetic() {
        let mut a = ItemCost::from(vec![5, 3]);
        let b = ItemCost::from(vec![2, 3]);
        let diff = &a - &b;
        assert_eq!(diff.as_slice(), &[3, 0]);
        assert!(!diff.is_zero());

        a -= &b;
        assert_eq!(a, diff);
        a += &b;
        assert_eq!(a.as_slice(), &[5, 3]);
        assert!(ItemCost::new(3).is_zero());
    }

    #[test]
    fn test_huge_costs_saturate() {
        assert_eq!(saturating_cost(42), 42);
        assert_eq!(saturating_cost(u64::MAX), i64::MAX);

        let mut costs = Costs::new();
        costs.add_type("cycles", CostUnit::Unknown);
        costs.add(0, 3, i64::MAX);
        costs.add(0, 3, 10);
        costs.add_total(0, i64::MAX);
        costs.add_total(0, 10);
        assert_eq!(costs.cost(0, 3), i64::MAX);
        assert_eq!(costs.total(0), i64::MAX);

        let mut item = ItemCost::from(vec![i64::MAX]);
        item += &ItemCost::from(vec![1]);
        assert_eq!(item[0], i64::MAX);
    }

    #[test]
    #[should_panic(expected = "length mismatch")]
    fn test_item_cost_length_mismatch_panics() {
        let mut a = ItemCost::new(2);
        a += &ItemCost::new(3);
    }

    #[test]
    fn test_item_cost_grows_on_add() {
        let mut cost = ItemCost::new(1);
        cost.add(2, 7);
        assert_eq!(cost.len(), 3);
        assert_eq!(cost[2], 7);
        assert_eq!(cost.get(9), 0);
    }

    #[test]
    fn test_costs_defaults_to_zero() {
        let mut costs = Costs::new();
        let cycles = costs.add_type("cycles", CostUnit::Unknown);
        let off_cpu = costs.add_type("off-CPU Time", CostUnit::Time);
        assert_eq!(costs.num_types(), 2);
        assert_eq!(costs.unit(off_cpu), CostUnit::Time);

        costs.add(cycles, 4, 10);
        assert_eq!(costs.cost(cycles, 4), 10);
        assert_eq!(costs.cost(cycles, 2), 0);
        assert_eq!(costs.cost(off_cpu, 4), 0);
        assert_eq!(costs.item_cost(4).as_slice(), &[10, 0]);
    }

    #[test]
    fn test_costs_totals_and_initialize_from() {
        let mut costs = Costs::new();
        let t = costs.add_type("samples", CostUnit::Unknown);
        costs.add(t, 0, 3);
        costs.add_total(t, 3);
        costs.add_item(1, &ItemCost::from(vec![2]));
        assert_eq!(costs.cost(t, 1), 2);

        let mut copy = Costs::new();
        copy.initialize_from(&costs);
        assert_eq!(copy.type_name(t), "samples");
        assert_eq!(copy.total(t), 3);
        assert_eq!(copy.cost(t, 0), 0);

        copy.clear_totals();
        assert_eq!(copy.total(t), 0);
        copy.set_totals(&[9]);
        assert_eq!(copy.totals(), &[9]);
    }
}
