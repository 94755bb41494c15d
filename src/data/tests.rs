//! Tests for data collaborators

#[cfg(test)]
mod tests {
    use super::super::*;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn btc() -> MarketData {
        MarketData {
            symbol: "BTC".to_string(),
            price: dec!(40000),
            volatility: dec!(0.04),
            historical_returns: vec![dec!(0.01); 25],
            volume: dec!(1000000),
        }
    }

    #[test]
    fn test_parse_insight_valid() {
        let raw = r#"{"sentiment": 0.5, "confidence": 0.8, "price_target": 44000, "timeframe": "1w"}"#;
        let insight = parse_insight(raw).unwrap();
        assert_eq!(insight.sentiment, dec!(0.5));
        assert_eq!(insight.confidence, dec!(0.8));
        assert_eq!(insight.price_target, dec!(44000));
        assert_eq!(insight.implied_return(dec!(40000)), dec!(0.1));
    }

    #[test]
    fn test_parse_insight_code_fence() {
        let raw = "```json\n{\"sentiment\": -0.2, \"confidence\": 0.6, \"price_target\": 95, \"timeframe\": \"1d\"}\n```";
        let insight = parse_insight(raw).unwrap();
        assert_eq!(insight.sentiment, dec!(-0.2));
    }

    #[test]
    fn test_parse_insight_rejects_out_of_range() {
        let raw = r#"{"sentiment": 1.5, "confidence": 0.8, "price_target": 100, "timeframe": "1d"}"#;
        let err = parse_insight(raw).unwrap_err();
        assert!(matches!(err, InsightParseError::OutOfRange { field: "sentiment", .. }));

        let raw = r#"{"sentiment": 0.1, "confidence": 1.2, "price_target": 100, "timeframe": "1d"}"#;
        assert!(matches!(
            parse_insight(raw).unwrap_err(),
            InsightParseError::OutOfRange { field: "confidence", .. }
        ));

        let raw = r#"{"sentiment": 0.1, "confidence": 0.5, "price_target": 0, "timeframe": "1d"}"#;
        assert!(matches!(
            parse_insight(raw).unwrap_err(),
            InsightParseError::OutOfRange { field: "price_target", .. }
        ));
    }

    #[test]
    fn test_parse_insight_rejects_unknown_and_missing_fields() {
        let extra = r#"{"sentiment": 0.1, "confidence": 0.5, "price_target": 10, "timeframe": "1d", "mood": "great"}"#;
        assert!(matches!(parse_insight(extra).unwrap_err(), InsightParseError::Malformed(_)));

        let missing = r#"{"sentiment": 0.1, "confidence": 0.5}"#;
        assert!(matches!(parse_insight(missing).unwrap_err(), InsightParseError::Malformed(_)));

        assert!(parse_insight("The market looks bullish!").is_err());
    }

    #[test]
    fn test_static_insights_drop_rejected_payloads() {
        let provider = StaticInsights::from_raw(vec![
            ("BTC", r#"{"sentiment": 0.5, "confidence": 0.8, "price_target": 44000, "timeframe": "1w"}"#),
            ("ETH", r#"{"sentiment": 3, "confidence": 0.8, "price_target": 44000, "timeframe": "1w"}"#),
        ]);
        tokio_test::block_on(async {
            assert!(provider.get_insight("BTC").await.unwrap().is_some());
            assert!(provider.get_insight("ETH").await.unwrap().is_none());
        });
    }

    #[tokio::test]
    async fn test_static_market_data_missing_symbol() {
        let provider = StaticMarketData::new(vec![btc()]);
        assert_eq!(provider.get_history("BTC").await.unwrap().price, dec!(40000));
        let err = provider.get_history("DOGE").await.unwrap_err();
        assert!(matches!(err, EngineError::DataUnavailable { .. }));

        let mut provider = provider;
        provider.insert(MarketData {
            symbol: "ADA".to_string(),
            ..btc()
        });
        assert_eq!(provider.symbols(), vec!["ADA".to_string(), "BTC".to_string()]);
    }

    #[tokio::test]
    async fn test_with_timeout_maps_to_data_unavailable() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, EngineError>(1)
        };
        let err = with_timeout("BTC", Duration::from_millis(10), slow).await.unwrap_err();
        match err {
            EngineError::DataUnavailable { symbol, reason } => {
                assert_eq!(symbol, "BTC");
                assert!(reason.contains("timed out"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_with_timeout_passes_result_through() {
        let fast = async { Ok::<_, EngineError>(7) };
        assert_eq!(with_timeout("BTC", Duration::from_millis(100), fast).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_mock_market_data_provider() {
        let mut mock = MockMarketDataProvider::new();
        mock.expect_get_history()
            .times(1)
            .returning(|symbol| Err(EngineError::data_unavailable(symbol, "exchange down")));
        let err = mock.get_history("SOL").await.unwrap_err();
        assert!(err.to_string().contains("exchange down"));
    }

    #[test]
    fn test_fixture_from_json() {
        let json = r#"{
            "portfolio": {
                "id": "pf-fixture",
                "cash": "60000",
                "positions": [
                    {"symbol": "BTC", "quantity": "1", "average_price": "35000", "current_price": "40000"}
                ]
            },
            "market": [
                {"symbol": "BTC", "price": "40000", "volatility": "0.04", "historical_returns": [], "volume": "1000"}
            ],
            "insights": {
                "BTC": {"sentiment": 0.5, "confidence": 0.8, "price_target": 44000, "timeframe": "1w"},
                "ETH": "not json"
            }
        }"#;
        let fixture = Fixture::from_json(json).unwrap();
        assert_eq!(fixture.portfolio.total_value, dec!(100000));
        assert_eq!(fixture.portfolio.metrics.initial_value, dec!(100000));
        tokio_test::block_on(async {
            assert!(fixture.market.get_history("BTC").await.is_ok());
            assert!(fixture.insights.get_insight("BTC").await.unwrap().is_some());
            assert!(fixture.insights.get_insight("ETH").await.unwrap().is_none());
        });
    }
}
