use std::net::SocketAddr;
use std::sync::Arc;

use dicom_core::{DataElement, PrimitiveValue, VR};
use dicom_dictionary_std::tags;
use dicom_object::InMemDicomObject;
use dicomhawk::audit::{AuditLogger, MemoryChannels};
use dicomhawk::catalog::{RecordStore, SubjectRecord};
use dicomhawk::responder::HoneypotResponder;
use dicomhawk::session::SessionRegistry;
use dimse::{
    AssociationHandle, AssociationHandler, AssociationInfo, DimseReply, DimseStatus, MoveRequest,
};
use futures_util::StreamExt;
use serde_json::Value;

struct Honeypot {
    responder: HoneypotResponder,
    registry: Arc<SessionRegistry>,
    channels: MemoryChannels,
}

fn record(id: &str, name: &str) -> SubjectRecord {
    SubjectRecord {
        id: id.to_string(),
        name: name.to_string(),
        ..SubjectRecord::fabricated()
    }
}

fn honeypot() -> Honeypot {
    let (audit, channels) = AuditLogger::in_memory();
    let store = RecordStore::from_records([
        record("1", "Frederik^Jensen"),
        record("2", "Sofie^Nielsen"),
    ]);
    let registry = Arc::new(SessionRegistry::new());
    let responder =
        HoneypotResponder::new(Arc::new(store), Arc::clone(&registry), Arc::new(audit));
    Honeypot {
        responder,
        registry,
        channels,
    }
}

fn info(handle: AssociationHandle) -> AssociationInfo {
    AssociationInfo {
        handle,
        peer: "198.51.100.7:51234".parse::<SocketAddr>().unwrap(),
        calling_ae_title: Some("SCANNER".to_string()),
        called_ae_title: "DICOMHAWK".to_string(),
        client_version: None,
    }
}

fn name_query(term: &str) -> InMemDicomObject {
    InMemDicomObject::from_element_iter([DataElement::new(
        tags::PATIENT_NAME,
        VR::PN,
        PrimitiveValue::from(term),
    )])
}

fn with_msg<'a>(records: &'a [Value], msg: &str) -> Vec<&'a Value> {
    records.iter().filter(|r| r["msg"] == msg).collect()
}

#[tokio::test]
async fn open_echo_close_emits_three_correlated_events() {
    let hp = honeypot();
    let handle = AssociationHandle::new(1);

    hp.responder.association_opened(&info(handle)).await;
    assert_eq!(hp.responder.echo(handle).await, DimseStatus::Success);
    hp.responder.association_closed(handle).await;

    let records = hp.channels.records();
    assert_eq!(records.len(), 3);

    let session = records[0]["session_id"].clone();
    assert!(session.is_string());
    assert!(records.iter().all(|r| r["session_id"] == session));

    assert_eq!(records[0]["msg"], "Connection from");
    assert_eq!(records[0]["level"], "warning");
    assert_eq!(records[0]["IP"], "198.51.100.7");
    assert_eq!(records[0]["Port"], 51234);
    assert_eq!(records[0]["Version"], "N/A");
    assert_eq!(records[1]["Command"], "C-ECHO");
    assert_eq!(records[2]["Status"], "Finished");
    assert!(records[2].get("Anomaly").is_none());

    assert!(hp.registry.is_empty());
}

#[tokio::test]
async fn find_exact_name_yields_one_pending_response() {
    let hp = honeypot();
    let handle = AssociationHandle::new(1);
    hp.responder.association_opened(&info(handle)).await;

    let replies: Vec<DimseReply> = hp
        .responder
        .find(handle, name_query("Frederik^Jensen"))
        .await
        .collect()
        .await;

    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].status(), DimseStatus::Pending);
    let matched = SubjectRecord::from_object(replies[0].dataset().unwrap()).unwrap();
    assert_eq!(matched.id, "1");

    let records = hp.channels.records();
    let search = with_msg(&records, "C-FIND Search");
    assert_eq!(search.len(), 1);
    assert_eq!(search[0]["Term"], "Frederik^Jensen");
    assert_eq!(search[0]["Type"], "PatientName");
    assert_eq!(with_msg(&records, "C-FIND Search result")[0]["Matches"], 1);
}

#[tokio::test]
async fn find_wildcard_and_absent_term_match_the_whole_store() {
    let hp = honeypot();
    let handle = AssociationHandle::new(1);

    let wildcard: Vec<DimseReply> = hp
        .responder
        .find(handle, name_query("*"))
        .await
        .collect()
        .await;
    assert_eq!(wildcard.len(), 2);
    assert!(wildcard.iter().all(|r| r.status() == DimseStatus::Pending));

    let absent: Vec<DimseReply> = hp
        .responder
        .find(handle, InMemDicomObject::new_empty())
        .await
        .collect()
        .await;
    assert_eq!(absent.len(), 2);

    let records = hp.channels.records();
    let results = with_msg(&records, "C-FIND Search result");
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r["Matches"] == 2));
    // no search term event for the query without PatientName
    assert_eq!(with_msg(&records, "C-FIND Search").len(), 1);
}

#[tokio::test]
async fn find_without_match_is_empty() {
    let hp = honeypot();
    let replies: Vec<DimseReply> = hp
        .responder
        .find(AssociationHandle::new(1), name_query("Nobody^Here"))
        .await
        .collect()
        .await;

    assert!(replies.is_empty());
    let records = hp.channels.records();
    assert_eq!(with_msg(&records, "C-FIND Search result")[0]["Matches"], 0);
}

#[tokio::test]
async fn dropped_find_logs_cancellation() {
    let hp = honeypot();
    let mut replies = hp
        .responder
        .find(AssociationHandle::new(1), name_query("*"))
        .await;

    assert!(replies.next().await.is_some());
    drop(replies);

    let records = hp.channels.records();
    assert!(with_msg(&records, "C-FIND Search result").is_empty());
    let cancelled = with_msg(&records, "C-FIND Search cancelled");
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0]["Matches"], 1);
}

#[tokio::test]
async fn get_counts_down_over_two_records() {
    let hp = honeypot();
    let replies: Vec<DimseReply> = hp
        .responder
        .get(AssociationHandle::new(1), InMemDicomObject::new_empty())
        .await
        .collect()
        .await;

    assert!(matches!(replies[0], DimseReply::SubOperations(2)));

    let progress: Vec<(Option<u32>, Option<String>)> = replies[1..]
        .iter()
        .map(|r| {
            let id = r
                .dataset()
                .map(|ds| SubjectRecord::from_object(ds).unwrap().id);
            (r.remaining(), id)
        })
        .collect();
    assert_eq!(
        progress,
        vec![
            (Some(2), Some("1".to_string())),
            (Some(1), Some("2".to_string())),
            (Some(0), None),
        ]
    );
    assert_eq!(replies.last().unwrap().status(), DimseStatus::Success);
}

#[tokio::test]
async fn move_ignores_destination_and_fabricates_one_record() {
    let hp = honeypot();
    let replies: Vec<DimseReply> = hp
        .responder
        .move_request(
            AssociationHandle::new(1),
            MoveRequest {
                destination: "ATTACKER_AE".to_string(),
                identifier: name_query("*"),
            },
        )
        .await
        .collect()
        .await;

    assert_eq!(replies.len(), 2);
    assert!(matches!(replies[0], DimseReply::SubOperations(1)));
    assert_eq!(replies[1].remaining(), Some(1));
    let fabricated = SubjectRecord::from_object(replies[1].dataset().unwrap()).unwrap();
    assert_eq!(fabricated.name, "Doe^John");

    let records = hp.channels.records();
    assert_eq!(records[0]["Command"], "C-MOVE");
    assert_eq!(records[0]["MoveDestination"], "ATTACKER_AE");
}

#[tokio::test]
async fn close_without_open_is_logged_as_anomaly() {
    let hp = honeypot();
    hp.responder
        .association_closed(AssociationHandle::new(99))
        .await;

    let records = hp.channels.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["Anomaly"], "close without open");
    assert_eq!(records[0]["level"], "warning");
    assert!(records[0]["session_id"].is_string());
    assert!(hp.channels.exception.is_empty());
}

#[tokio::test]
async fn commands_before_open_share_the_later_session() {
    let hp = honeypot();
    let handle = AssociationHandle::new(5);

    hp.responder.echo(handle).await;
    hp.responder.association_opened(&info(handle)).await;
    hp.responder.association_closed(handle).await;

    let records = hp.channels.records();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r["session_id"] == records[0]["session_id"]));
}

#[tokio::test]
async fn concurrent_associations_get_distinct_sessions() {
    let hp = Arc::new(honeypot());
    let tasks: Vec<_> = (0..16u64)
        .map(|i| {
            let hp = Arc::clone(&hp);
            tokio::spawn(async move {
                let handle = AssociationHandle::new(i);
                hp.responder.association_opened(&info(handle)).await;
                hp.responder.echo(handle).await;
                hp.responder.association_closed(handle).await;
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let records = hp.channels.records();
    assert_eq!(records.len(), 48);
    let mut sessions: Vec<&str> = records
        .iter()
        .map(|r| r["session_id"].as_str().unwrap())
        .collect();
    sessions.sort_unstable();
    sessions.dedup();
    assert_eq!(sessions.len(), 16);
    assert!(hp.registry.is_empty());
}

#[tokio::test]
async fn rejected_connection_has_no_session() {
    let hp = honeypot();
    hp.responder
        .connection_rejected("203.0.113.9:4444".parse().unwrap(), "unexpected PDU type")
        .await;

    let records = hp.channels.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["session_id"], Value::Null);
    assert_eq!(records[0]["Reason"], "unexpected PDU type");
}
