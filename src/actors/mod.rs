mod message;
mod segment_actor;

use crossbeam_channel::{unbounded, Receiver, Sender};
use miette::{Context, IntoDiagnostic};
use tracing::{debug, info};

pub use message::*;
pub use segment_actor::SegmentActor;

use crate::{
    database::SegmentDb,
    result::{err_msg, Result},
    segment_cache::SegmentCache,
};

pub trait Actor<From, To> {
    fn set_receive_channel(&mut self, channel: Receiver<From>);

    fn set_send_channel(&mut self, channel: Sender<To>);

    fn run(self) -> Result<()>;
}

/// Compose every segment of a transcript on a pool of worker actors.
///
/// The results are in the order of the segments. A failing segment only
/// fails its own result.
pub fn compose_transcript<D: SegmentDb>(
    cache: &SegmentCache<'_, D>,
    segments: Vec<Segment>,
    workers: usize,
    use_service: bool,
) -> Result<Vec<SegmentResult>> {
    let workers = workers.clamp(1, segments.len().max(1));
    info!("Composing {} segments with {workers} workers", segments.len());

    // Initialize the actors
    let (input, receive) = unbounded();
    let (send, output) = unbounded();
    let mut actors = Vec::with_capacity(workers);
    for id in 0..workers {
        let mut actor = SegmentActor::new(id, cache, use_service);
        actor.set_receive_channel(receive.clone());
        actor.set_send_channel(send.clone());
        actors.push(actor);
    }

    // Only the actors must hold the ends, so that the channels close when they stop
    drop(receive);
    drop(send);

    // Fill the input channel with all the tasks
    for (index, segment) in segments.into_iter().enumerate() {
        input
            .send(SegmentJob { index, segment })
            .into_diagnostic()
            .wrap_err("Could not send segment")?;
    }
    drop(input);

    std::thread::scope(|scope| -> Result<Vec<SegmentResult>> {
        let mut handles = Vec::with_capacity(actors.len());
        for actor in actors {
            let handle = std::thread::Builder::new()
                .name(format!("segment-{}", actor.id()))
                .spawn_scoped(scope, move || actor.run())?;
            handles.push(handle);
        }

        let mut results: Vec<SegmentResult> = output.iter().collect();

        for handle in handles {
            handle
                .join()
                .map_err(|_| err_msg("Segment worker panicked"))??;
        }

        results.sort_by_key(|result| result.index);
        debug!("All {} segments completed", results.len());
        Ok(results)
    })
}
