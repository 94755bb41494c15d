#[cfg(test)]
mod tests {
    use super::super::*;
    use rust_decimal_macros::dec;

    fn series(values: &[Decimal]) -> Vec<Decimal> {
        values.to_vec()
    }

    /// Alternating +/- pattern of length n, scaled
    fn zigzag(n: usize, scale: Decimal) -> Vec<Decimal> {
        (0..n)
            .map(|i| if i % 2 == 0 { scale } else { -scale })
            .collect()
    }

    #[test]
    fn test_pearson_perfect_and_inverse() {
        let x = series(&[dec!(0.01), dec!(0.02), dec!(0.03), dec!(0.04)]);
        let y = series(&[dec!(0.02), dec!(0.04), dec!(0.06), dec!(0.08)]);
        let z = series(&[dec!(0.04), dec!(0.03), dec!(0.02), dec!(0.01)]);

        assert!((pearson(&x, &y) - Decimal::ONE).abs() < dec!(0.000001));
        assert!((pearson(&x, &z) + Decimal::ONE).abs() < dec!(0.000001));
    }

    #[test]
    fn test_pearson_zero_variance() {
        let flat = vec![dec!(0.01); 10];
        let moving = zigzag(10, dec!(0.02));
        assert_eq!(pearson(&flat, &moving), Decimal::ZERO);
    }

    #[test]
    fn test_build_excludes_short_history() {
        let engine = CorrelationEngine::new(20, 90);
        let input = vec![
            ("BTC".to_string(), zigzag(30, dec!(0.02))),
            ("ETH".to_string(), zigzag(30, dec!(0.03))),
            ("NEW".to_string(), zigzag(5, dec!(0.05))),
        ];

        let out = engine.build(&input);
        assert_eq!(out.matrix.symbols, vec!["BTC".to_string(), "ETH".to_string()]);
        assert_eq!(out.excluded.len(), 1);
        assert_eq!(out.excluded[0].0, "NEW");
        assert!(out.excluded[0].1.contains("insufficient history"));
    }

    #[test]
    fn test_matrix_symmetric_with_unit_diagonal() {
        let engine = CorrelationEngine::new(4, 90);
        let a = series(&[dec!(0.01), dec!(-0.02), dec!(0.03), dec!(0.00), dec!(0.01)]);
        let b = series(&[dec!(0.02), dec!(-0.01), dec!(0.01), dec!(0.02), dec!(-0.03)]);
        let c = series(&[dec!(-0.01), dec!(0.02), dec!(0.00), dec!(0.01), dec!(0.02)]);
        let out = engine.build(&[
            ("A".to_string(), a),
            ("B".to_string(), b),
            ("C".to_string(), c),
        ]);
        let m = &out.matrix;

        for i in 0..3 {
            assert_eq!(m.values[i][i], Decimal::ONE);
            for j in 0..3 {
                assert_eq!(m.values[i][j], m.values[j][i]);
                assert!(m.values[i][j] >= -Decimal::ONE && m.values[i][j] <= Decimal::ONE);
            }
        }
    }

    #[test]
    fn test_alignment_uses_most_recent_observations() {
        let engine = CorrelationEngine::new(4, 90);
        // Long series has noise in front; the last four observations match the short one.
        let mut long = vec![dec!(0.5), dec!(-0.7), dec!(0.9)];
        long.extend([dec!(0.01), dec!(0.02), dec!(0.03), dec!(0.04)]);
        let short = vec![dec!(0.01), dec!(0.02), dec!(0.03), dec!(0.04)];

        let out = engine.build(&[("L".to_string(), long), ("S".to_string(), short)]);
        assert!((out.matrix.get("L", "S") - Decimal::ONE).abs() < dec!(0.000001));
    }

    #[test]
    fn test_lookback_caps_window() {
        let engine = CorrelationEngine::new(4, 4);
        // Older half anti-correlated, recent four observations identical.
        let a = vec![
            dec!(0.03), dec!(0.01), dec!(0.02), dec!(0.04),
            dec!(0.01), dec!(0.02), dec!(0.03), dec!(0.04),
        ];
        let b = vec![
            dec!(-0.03), dec!(-0.01), dec!(-0.02), dec!(-0.04),
            dec!(0.01), dec!(0.02), dec!(0.03), dec!(0.04),
        ];
        let out = engine.build(&[("A".to_string(), a), ("B".to_string(), b)]);
        assert!((out.matrix.get("A", "B") - Decimal::ONE).abs() < dec!(0.000001));
    }

    #[test]
    fn test_average_correlation() {
        let m = CorrelationMatrix {
            symbols: vec!["A".into(), "B".into(), "C".into()],
            values: vec![
                vec![dec!(1), dec!(0.5), dec!(0.1)],
                vec![dec!(0.5), dec!(1), dec!(-0.3)],
                vec![dec!(0.1), dec!(-0.3), dec!(1)],
            ],
        };
        assert_eq!(m.average_correlation("A"), dec!(0.3));
        assert_eq!(m.average_correlation("B"), dec!(0.1));
        assert_eq!(m.average_correlation("C"), dec!(-0.1));
        assert_eq!(m.average_correlation("ZZZ"), Decimal::ZERO);
    }

    #[test]
    fn test_single_symbol_matrix() {
        let m = CorrelationMatrix::identity(vec!["BTC".into()]);
        assert_eq!(m.average_correlation("BTC"), Decimal::ZERO);
        assert_eq!(m.get("BTC", "BTC"), Decimal::ONE);
        assert_eq!(m.get("BTC", "ETH"), Decimal::ZERO);
    }

    #[test]
    fn test_subset_keeps_requested_order() {
        let m = CorrelationMatrix {
            symbols: vec!["A".into(), "B".into(), "C".into()],
            values: vec![
                vec![dec!(1), dec!(0.5), dec!(0.1)],
                vec![dec!(0.5), dec!(1), dec!(-0.3)],
                vec![dec!(0.1), dec!(-0.3), dec!(1)],
            ],
        };
        let sub = m.subset(&["C".to_string(), "A".to_string()]);
        assert_eq!(sub.symbols, vec!["C".to_string(), "A".to_string()]);
        assert_eq!(sub.values[0][1], dec!(0.1));
        assert_eq!(sub.values[1][1], Decimal::ONE);
    }

    #[test]
    fn test_empty_input() {
        let out = CorrelationEngine::default().build(&[]);
        assert!(out.matrix.is_empty());
        assert!(out.excluded.is_empty());
    }
}
