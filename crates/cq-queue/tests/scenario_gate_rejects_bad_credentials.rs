use cq_queue::{authenticate, InMemoryQueueStore, QueueError};
use serde_json::json;

fn store() -> InMemoryQueueStore {
    let s = InMemoryQueueStore::new();
    s.insert_user("kiosk", "s3cret");
    s
}

#[tokio::test]
async fn known_user_wrong_secret_is_401() {
    let body = json!({"kullaniciBilgisi": {"kullanici_adi": "kiosk", "sifre": "nope"}});
    assert!(matches!(
        authenticate(&store(), &body).await,
        Err(QueueError::Unauthorized(_))
    ));
}

#[tokio::test]
async fn unknown_user_is_401() {
    let body = json!({"kullaniciBilgisi": {"kullanici_adi": "ghost", "sifre": "s3cret"}});
    assert!(matches!(
        authenticate(&store(), &body).await,
        Err(QueueError::Unauthorized(_))
    ));
}

#[tokio::test]
async fn no_credential_block_is_400() {
    let body = json!({"hastaEkle": {"protokolNo": "1"}});
    assert!(matches!(
        authenticate(&store(), &body).await,
        Err(QueueError::Validation(_))
    ));
}

#[tokio::test]
async fn only_the_last_array_element_counts() {
    let body = json!([
        {"kullaniciBilgisi": {"kullanici_adi": "kiosk", "sifre": "s3cret"}},
        {"hastaEkle": {}}
    ]);
    assert!(matches!(
        authenticate(&store(), &body).await,
        Err(QueueError::Validation(_))
    ));

    let body = json!([
        {"hastaEkle": {}},
        {"kullaniciBilgisi": {"kullanici_adi": "kiosk", "sifre": "s3cret"}}
    ]);
    assert_eq!(authenticate(&store(), &body).await.unwrap().username, "kiosk");
}
