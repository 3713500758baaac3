//! Property tests for importing whole graphs


use axisflow::config::ImportConfig;
use generators::{arb_graph_plan, build_graph};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Importing structurally identical graphs gives identical results,
    /// dimension naming included
    #[test]
    fn import_is_deterministic(plan in arb_graph_plan()) {
        let config = ImportConfig::default();
        let first = build_graph(&plan).import(&config);
        let second = build_graph(&plan).import(&config);
        if let (Ok(a), Ok(b)) = (&first, &second) {
            prop_assert_eq!(&a.naming, &b.naming);
        }
        prop_assert_eq!(first, second);
    }

    /// Every operation's final names are distinct and sort in positional order
    #[test]
    fn final_names_follow_positions(plan in arb_graph_plan()) {
        let graph = build_graph(&plan).finish();
        prop_assume!(graph.solve(&ImportConfig::default()).is_ok());

        for (id, _) in graph.operations() {
            let names = graph.final_type(id).unwrap().dimension_names().to_vec();
            for pair in names.windows(2) {
                prop_assert!(pair[0] < pair[1], "{:?} not increasing", names);
            }
        }
    }

    /// Operands of an operation that are constrained to one axis share its name
    #[test]
    fn unary_operations_keep_operand_names(plan in arb_graph_plan()) {
        use axisflow::import::OperationKind;

        let graph = build_graph(&plan).finish();
        prop_assume!(graph.solve(&ImportConfig::default()).is_ok());

        for (id, op) in graph.operations() {
            if matches!(op.kind(), OperationKind::Map(_) | OperationKind::Softmax { .. }) {
                let own = graph.final_type(id).unwrap();
                let operand = graph.final_type(op.operands()[0]).unwrap();
                prop_assert_eq!(own, operand);
            }
        }
    }
}
