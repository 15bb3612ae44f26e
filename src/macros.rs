//! Declarative helpers for building heterogeneous fact lists.

/// Build a `Vec<FactRef>` from heterogeneous values.
///
/// ```ignore
/// let initial = facts![
///     Customer { id: "1".into(), total_spend_cents: 15_000_00 },
///     CartItem { sku: "widget".into(), quantity: 15 },
/// ];
/// engine.evaluate(initial)?;
/// ```
#[macro_export]
macro_rules! facts {
    () => {
        ::std::vec::Vec::<$crate::FactRef>::new()
    };
    ($($fact:expr),+ $(,)?) => {
        ::std::vec![$($crate::FactRef::new($fact)),+]
    };
}

#[cfg(test)]
mod tests {
    use crate::FactRef;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct Customer {
        id: String,
    }

    #[test]
    fn empty_invocation_builds_an_empty_list() {
        let none = facts![];
        assert!(none.is_empty());
    }

    #[test]
    fn mixed_types_share_one_list() {
        let list = facts![Customer { id: "1".into() }, 42_u32, "note".to_string()];
        assert_eq!(list.len(), 3);
        assert!(list[0].is::<Customer>());
        assert!(list[1].is::<u32>());
        assert_eq!(list[1], FactRef::new(42_u32));
    }
}
