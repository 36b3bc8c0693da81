//! Blob store behaviour over the in-memory object store.

use std::sync::Arc;

use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::ObjectStore;

use ots_store::store::{BlobStore, ObjectBlobStore};
use ots_store::{CallContext, ErrorKind, StoreError};

#[tokio::test]
async fn test_roundtrip_under_derived_key() {
    let inner = Arc::new(InMemory::new());
    let blobs = ObjectBlobStore::new(inner.clone(), "memory");
    let ctx = CallContext::background();
    let payload: Vec<u8> = (0..=255u8).collect();

    blobs.store_encrypted_file(&ctx, "abc123", &payload).await.unwrap();

    let meta = inner.head(&Path::from("abc123.enc")).await.unwrap();
    assert!(meta.size > payload.len(), "body should be text-encoded");
    assert_eq!(blobs.get_encrypted_file(&ctx, "abc123").await.unwrap(), payload);
}

#[tokio::test]
async fn test_get_missing_is_an_error_with_cause() {
    let blobs = ObjectBlobStore::in_memory();
    let err = blobs
        .get_encrypted_file(&CallContext::background(), "never-uploaded")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    match &err {
        StoreError::ObjectMissing { key, source } => {
            assert_eq!(key, "never-uploaded.enc");
            assert!(matches!(source, object_store::Error::NotFound { .. }));
        }
        other => panic!("expected ObjectMissing, got {:?}", other),
    }
}

#[tokio::test]
async fn test_delete_is_not_idempotent() {
    let blobs = ObjectBlobStore::in_memory();
    let ctx = CallContext::background();

    let err = blobs
        .delete_encrypted_file(&ctx, "never-uploaded")
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    blobs.store_encrypted_file(&ctx, "abc123", b"cipher").await.unwrap();
    blobs.delete_encrypted_file(&ctx, "abc123").await.unwrap();
    assert!(blobs
        .delete_encrypted_file(&ctx, "abc123")
        .await
        .unwrap_err()
        .is_not_found());
    assert!(blobs
        .get_encrypted_file(&ctx, "abc123")
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_overwrite_replaces_payload() {
    let blobs = ObjectBlobStore::in_memory();
    let ctx = CallContext::background();

    blobs.store_encrypted_file(&ctx, "abc123", b"first").await.unwrap();
    blobs.store_encrypted_file(&ctx, "abc123", b"second").await.unwrap();
    assert_eq!(
        blobs.get_encrypted_file(&ctx, "abc123").await.unwrap(),
        b"second".to_vec()
    );
}

#[tokio::test]
async fn test_cancelled_context_skips_upload() {
    let inner = Arc::new(InMemory::new());
    let blobs = ObjectBlobStore::new(inner.clone(), "memory");
    let token = tokio_util::sync::CancellationToken::new();
    token.cancel();
    let ctx = CallContext::background().with_cancellation(token);

    let err = blobs
        .store_encrypted_file(&ctx, "abc123", b"cipher")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(inner.head(&Path::from("abc123.enc")).await.is_err());
}
