mod common;

use common::*;
use dicom_dictionary_std::tags;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn get_reports_sub_operation_progress() {
    let honeypot = RunningHoneypot::start(frederik_and_sofie()).await;
    let addr = honeypot.addr;

    let responses = tokio::task::spawn_blocking(move || {
        let mut scu = Scu::connect(addr, &[PATIENT_ROOT_GET]);
        scu.send(
            PATIENT_ROOT_GET,
            &request(C_GET_RQ, 3, PATIENT_ROOT_GET, true),
            Some(&patient_query("*")),
        );
        let responses = scu.receive_sequence(PATIENT_ROOT_GET);
        scu.release();
        responses
    })
    .await
    .unwrap();

    let progress: Vec<(u16, Option<u16>, Option<u16>)> = responses
        .iter()
        .map(|r| {
            (
                r.status(),
                r.field(tags::NUMBER_OF_REMAINING_SUBOPERATIONS),
                r.field(tags::NUMBER_OF_COMPLETED_SUBOPERATIONS),
            )
        })
        .collect();
    assert_eq!(
        progress,
        vec![
            (0xFF00, Some(2), Some(0)),
            (0xFF00, Some(1), Some(1)),
            (0x0000, None, Some(2)),
        ]
    );

    for response in &responses {
        assert_eq!(response.field(tags::COMMAND_FIELD), Some(0x8010));
        assert_eq!(response.field(tags::MESSAGE_ID_BEING_RESPONDED_TO), Some(3));
        assert_eq!(response.field(tags::NUMBER_OF_FAILED_SUBOPERATIONS), Some(0));
        assert!(response.dataset.is_none());
    }

    honeypot.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn get_on_empty_catalog_completes_immediately() {
    let honeypot = RunningHoneypot::start(Vec::new()).await;
    let addr = honeypot.addr;

    let responses = tokio::task::spawn_blocking(move || {
        let mut scu = Scu::connect(addr, &[PATIENT_ROOT_GET]);
        scu.send(
            PATIENT_ROOT_GET,
            &request(C_GET_RQ, 4, PATIENT_ROOT_GET, true),
            Some(&patient_query("*")),
        );
        let responses = scu.receive_sequence(PATIENT_ROOT_GET);
        scu.release();
        responses
    })
    .await
    .unwrap();

    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status(), 0x0000);
    assert_eq!(responses[0].field(tags::NUMBER_OF_COMPLETED_SUBOPERATIONS), Some(0));

    honeypot.stop().await;
}
