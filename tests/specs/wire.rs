//! Daemon wire specs: framing across a real Unix socket and the
//! byte-exact put/get law.

use tokio::io::BufReader;

use ph_wire::{
    read_frame, write_frame, Action, FileBytes, Request, Response,
};

#[tokio::test]
async fn frames_cross_a_unix_socket_pair() {
    let (client, server) = tokio::net::UnixStream::pair().unwrap();

    let server_task = tokio::spawn(async move {
        let (read, mut write) = server.into_split();
        let mut read = BufReader::new(read);
        loop {
            let request: Request = match read_frame(&mut read).await {
                Ok(request) => request,
                Err(_) => return,
            };
            let response = Response::success(
                request.id,
                serde_json::json!({ "action": request.action.as_str() }),
            );
            if write_frame(&mut write, &response).await.is_err() {
                return;
            }
        }
    });

    let (read, mut write) = client.into_split();
    let mut read = BufReader::new(read);
    for (id, action) in [(1, Action::Ping), (2, Action::FileList), (3, Action::FileRg)] {
        write_frame(&mut write, &Request::new(id, action)).await.unwrap();
        let response: Response = read_frame(&mut read).await.unwrap();
        assert_eq!(response.id, id);
        assert_eq!(response.data.unwrap()["action"], action.as_str());
    }
    drop(write);
    let _ = server_task.await;
}

#[test]
fn put_get_put_preserves_bytes_exactly() {
    // Arbitrary binary content including newlines and invalid UTF-8.
    let original: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();

    // put: encode for the wire.
    let uploaded = FileBytes::from_bytes("data.bin", &original);
    let wire_json = serde_json::to_string(&uploaded).unwrap();

    // get: decode what came back.
    let downloaded: FileBytes = serde_json::from_str(&wire_json).unwrap();
    let on_disk = downloaded.to_bytes().unwrap();
    assert_eq!(on_disk, original);

    // put again: identical bytes on the wire, no base64 drift.
    let reuploaded = FileBytes::from_bytes("data.bin", &on_disk);
    assert_eq!(reuploaded.content_b64, uploaded.content_b64);
}
