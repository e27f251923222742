//! Test data builders for creating test parents

use dataflow_rs::ErrorSink;
use std::sync::Mutex;

/// Errors delivered to [`Order`] parents, across all tests of one binary
pub static ORDER_ERRORS: Mutex<Vec<(u32, String)>> = Mutex::new(Vec::new());

/// A parent that consumes its own split failures
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Order {
    pub id: u32,
    pub lines: Vec<u32>,
}

impl ErrorSink for Order {
    fn on_error(&self, error: &anyhow::Error) -> bool {
        ORDER_ERRORS
            .lock()
            .unwrap()
            .push((self.id, error.to_string()));
        true
    }
}

/// Errors recorded so far for the order with `id`
pub fn order_errors(id: u32) -> Vec<String> {
    ORDER_ERRORS
        .lock()
        .unwrap()
        .iter()
        .filter(|(order, _)| *order == id)
        .map(|(_, message)| message.clone())
        .collect()
}

/// Builder for creating test Orders
pub struct OrderBuilder {
    id: u32,
    lines: Vec<u32>,
}

impl OrderBuilder {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            lines: Vec::new(),
        }
    }

    pub fn line(mut self, quantity: u32) -> Self {
        self.lines.push(quantity);
        self
    }

    pub fn lines(mut self, quantities: impl IntoIterator<Item = u32>) -> Self {
        self.lines.extend(quantities);
        self
    }

    pub fn build(self) -> Order {
        Order {
            id: self.id,
            lines: self.lines,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_builder() {
        let order = OrderBuilder::new(7).line(1).lines([2, 3]).build();
        assert_eq!(order.id, 7);
        assert_eq!(order.lines, vec![1, 2, 3]);
    }
}
