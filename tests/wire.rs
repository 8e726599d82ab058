mod utils;

use tapedeck::broadcast::BroadcastSink;
use tapedeck::cache::{CacheStage, MemoryCacheStore};
use tapedeck::capture::ResponseCapture;
use tapedeck::codec::CaptureCodec;
use tapedeck::error::BoxError;
use tapedeck::http::Method;
use tapedeck::pipeline::PipelineBuilder;
use tapedeck::sink::{BufferedSink, DynSink, WireSink};
use utils::{UserApi, request};

const USER_42: &[u8] =
    b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\n\r\n{\"id\":42}";

#[tokio::test]
async fn test_cached_response_identical_on_the_wire() -> Result<(), BoxError> {
    let pipeline = PipelineBuilder::new()
        .with_stage(CacheStage::new(MemoryCacheStore::new()))
        .handler(UserApi::new());
    let req = request(Method::GET, "/users/42");

    let mut live = WireSink::new(Vec::new());
    pipeline.serve(&req, &mut live).await?;
    live.flush().await?;
    let mut cached = WireSink::new(Vec::new());
    pipeline.serve(&req, &mut cached).await?;
    cached.flush().await?;

    assert_eq!(USER_42, live.into_inner().as_slice());
    assert_eq!(USER_42, cached.into_inner().as_slice());
    Ok(())
}

#[tokio::test]
async fn test_capture_broadcast_and_replay_agree() -> Result<(), BoxError> {
    let pipeline = PipelineBuilder::new().handler(UserApi::new());
    let req = request(Method::GET, "/users/42");

    let mut conn = WireSink::new(Vec::new());
    let mut mirror = BufferedSink::new();
    let captured = {
        let broadcast = BroadcastSink::new(&mut conn as &mut DynSink<'_>)
            .with_sink(&mut mirror as &mut DynSink<'_>);
        let mut capture = ResponseCapture::new(broadcast);
        pipeline.serve(&req, &mut capture).await?;
        capture.into_captured()
    };
    conn.flush().await?;
    assert_eq!(USER_42, conn.into_inner().as_slice());
    assert_eq!(b"{\"id\":42}", mirror.body());

    let codec = CaptureCodec::new();
    let restored = codec.decode(&codec.encode(&captured))?;
    let mut replayed = WireSink::new(Vec::new());
    restored.replay(&mut replayed)?;
    replayed.flush().await?;
    assert_eq!(USER_42, replayed.into_inner().as_slice());
    Ok(())
}
