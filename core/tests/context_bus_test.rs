// Context Bus integration tests
// Concurrent writers, raw-mapping updates and task export

use agrosense_core::context::{ContextUpdate, PENDING_DIAGNOSIS};
use agrosense_core::{AgroError, AssetCategory, ContextBus, Intent, Severity};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_concurrent_regional_writes_all_land() {
    let bus = Arc::new(ContextBus::new());
    bus.create_session("s-conc", "maize leaves turning yellow", "Eldoret")
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..16 {
        let bus = bus.clone();
        handles.push(tokio::spawn(async move {
            bus.update(
                "s-conc",
                ContextUpdate::new().regional(format!("source_{i:02}"), json!({"i": i})),
            )
            .await
            .unwrap();
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let record = bus.get("s-conc").await.unwrap().unwrap();
    assert_eq!(record.regional_data.len(), 16);
    assert_eq!(record.regional_data["source_07"].data, json!({"i": 7}));
}

#[tokio::test]
async fn test_disjoint_writers_do_not_clobber() {
    let bus = Arc::new(ContextBus::new());
    bus.create_session("s-dis", "ticks on my cattle", "Nakuru")
        .await
        .unwrap();

    let a = {
        let bus = bus.clone();
        tokio::spawn(async move {
            bus.update(
                "s-dis",
                ContextUpdate::new()
                    .asset_category(AssetCategory::Livestock)
                    .asset_name(Some("cattle".into())),
            )
            .await
        })
    };
    let b = {
        let bus = bus.clone();
        tokio::spawn(async move {
            bus.update("s-dis", ContextUpdate::new().intent(Intent::PestManagement))
                .await
        })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    let record = bus.get("s-dis").await.unwrap().unwrap();
    assert_eq!(record.asset_category, AssetCategory::Livestock);
    assert_eq!(record.asset_name.as_deref(), Some("cattle"));
    assert_eq!(record.intent, Intent::PestManagement);
}

#[tokio::test]
async fn test_update_from_model_fields() {
    let bus = ContextBus::new();
    bus.create_session("s-raw", "original query", "Kisumu")
        .await
        .unwrap();

    let fields = json!({
        "asset_type": "crop",
        "asset_name": "beans",
        "intent": "no_such_intent",
        "query": "rewritten",
        "mystery": 1,
        "retrieved_context": [
            {"content": "Rotate crops yearly", "source": "Beans Guide.pdf", "page": 3, "asset_category": "CROP", "score": 0.7}
        ]
    });
    let update = ContextUpdate::from_fields(fields.as_object().unwrap()).unwrap();
    let record = bus.update("s-raw", update).await.unwrap();

    assert_eq!(record.query, "original query");
    assert_eq!(record.asset_category, AssetCategory::Crop);
    assert_eq!(record.asset_name.as_deref(), Some("beans"));
    assert_eq!(record.intent, Intent::GeneralAdvice);
    assert_eq!(record.retrieved_documents.len(), 1);
    assert_eq!(record.retrieved_documents[0].page, 3);
}

#[tokio::test]
async fn test_invalid_document_rejects_whole_update() {
    let bus = ContextBus::new();
    bus.create_session("s-bad", "q", "Nyeri").await.unwrap();

    let update = ContextUpdate::new()
        .final_diagnosis("should not land")
        .documents(vec![
            agrosense_core::context::DocumentInput::Raw(json!({"content": "ok", "source": "a.pdf"})),
            agrosense_core::context::DocumentInput::Raw(json!({"source": "missing content"})),
        ]);
    let err = bus.update("s-bad", update).await.unwrap_err();
    assert!(matches!(err, AgroError::Validation(_)));

    let record = bus.get("s-bad").await.unwrap().unwrap();
    assert_eq!(record.final_diagnosis, PENDING_DIAGNOSIS);
    assert!(record.retrieved_documents.is_empty());
}

#[tokio::test]
async fn test_export_renders_wire_strings() {
    let bus = ContextBus::new();
    bus.create_session("s-exp", "q", "Meru").await.unwrap();
    bus.update(
        "s-exp",
        ContextUpdate::new()
            .asset_category(AssetCategory::Crop)
            .intent(Intent::DiseaseDiagnosis)
            .alert_severity_raw("high"),
    )
    .await
    .unwrap();

    let exported = bus.export_for_task("s-exp").await.unwrap();
    assert_eq!(exported["asset_category"], "CROP");
    assert_eq!(exported["intent"], "disease_diagnosis");
    assert_eq!(exported["alert_severity"], "HIGH");
    assert_eq!(exported["final_diagnosis"], PENDING_DIAGNOSIS);

    let record = bus.get("s-exp").await.unwrap().unwrap();
    assert_eq!(record.alert_severity, Some(Severity::High));
}

#[tokio::test]
async fn test_cleared_session_rejects_updates() {
    let bus = ContextBus::new();
    bus.create_session("s-gone", "q", "Embu").await.unwrap();
    bus.clear("s-gone").await.unwrap();

    let err = bus
        .update("s-gone", ContextUpdate::new().final_diagnosis("late"))
        .await
        .unwrap_err();
    assert!(matches!(err, AgroError::SessionNotFound(_)));
    assert!(bus.is_empty().await.unwrap());
}
