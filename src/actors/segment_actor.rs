use crossbeam_channel::{Receiver, Sender};
use miette::{Context, IntoDiagnostic};
use tracing::{debug, warn};

use crate::{
    database::SegmentDb,
    result::{err_msg, Result},
    segment_cache::SegmentCache,
};

use super::{Actor, SegmentJob, SegmentResult};

/// Worker composing the segments it receives through the segment cache.
///
/// A failing segment is reported in its result, the actor keeps going.
pub struct SegmentActor<'a, D> {
    id: usize,
    cache: &'a SegmentCache<'a, D>,
    use_service: bool,

    receive_channel: Option<Receiver<SegmentJob>>,
    send_channel: Option<Sender<SegmentResult>>,
}

impl<D: SegmentDb> Actor<SegmentJob, SegmentResult> for SegmentActor<'_, D> {
    fn set_receive_channel(&mut self, channel: Receiver<SegmentJob>) {
        self.receive_channel = Some(channel);
    }

    fn set_send_channel(&mut self, channel: Sender<SegmentResult>) {
        self.send_channel = Some(channel);
    }

    fn run(mut self) -> Result<()> {
        let receive_channel = self
            .receive_channel
            .take()
            .ok_or_else(|| err_msg("Receive channel not set"))?;

        let send_channel = self
            .send_channel
            .take()
            .ok_or_else(|| err_msg("Send channel not set"))?;

        debug!("Actor {} started, waiting for a segment", self.id);

        for SegmentJob { index, segment } in receive_channel {
            debug!("Segment #{index} received: {:?}", segment.text);

            let (video, error) = match self.cache.compose_cached(&segment.text, self.use_service) {
                Ok(output) => (Some(output), None),
                Err(err) => {
                    warn!("Segment #{index} failed: {err}");
                    (None, Some(err.to_string()))
                }
            };

            send_channel
                .send(SegmentResult {
                    index,
                    segment,
                    video,
                    error,
                })
                .into_diagnostic()
                .wrap_err("Could not send message")?;
        }

        debug!("All segments processed. Stopping actor {}", self.id);
        Ok(())
    }
}

impl<'a, D> SegmentActor<'a, D> {
    pub fn new(id: usize, cache: &'a SegmentCache<'a, D>, use_service: bool) -> Self {
        Self {
            id,
            cache,
            use_service,
            receive_channel: None,
            send_channel: None,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }
}
