// =============================================================================
// RENDER LOOP - frame-in-flight protocol
// =============================================================================
//
// One iteration:
//
//   wait fence(slot) -> acquire -> reset fence -> record -> submit -> present -> next slot
//
// The loop only talks to a FrameBackend, which owns the real GPU objects
// (frame slot ring, presentation chain, render pass). Chain invalidation is
// handled entirely in here and never reaches the caller.

use anyhow::Result;
use ash::vk;
use std::time::Duration;

use crate::backend::sync::next_slot;
use crate::platform::Platform;

/// Result of asking the presentation engine for an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Ready(u32),
    /// Usable this frame, but the chain should be rebuilt before the next present.
    Suboptimal(u32),
    /// Nothing was acquired; the chain no longer matches the surface.
    OutOfDate,
}

/// Result of handing a rendered image back to the presentation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

/// What one call to [`RenderLoop::render_frame`] ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame was submitted and presented.
    Presented,
    /// The frame was submitted, but a resize arrived so presentation was skipped.
    PresentSkipped,
    /// Acquire reported the chain out of date; nothing was recorded.
    AcquireFailed,
    /// The window is closing while minimized; the chain could not be rebuilt.
    Abandoned,
}

/// Lifecycle of the presentation chain as seen by the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Valid,
    OutOfDate,
    Rebuilding,
}

/// GPU operations the loop drives, one frame slot at a time.
///
/// `slot` is always in `0..slot_count()`. Errors returned from here are fatal.
pub trait FrameBackend {
    /// Whatever the application hands in to fill the render pass.
    type Content: ?Sized;

    fn slot_count(&self) -> usize;

    /// Block until the slot's previous submission completed.
    fn wait_for_slot(&mut self, slot: usize, timeout: Duration) -> Result<()>;

    /// Acquire the next image, signaling the slot's "image acquired" semaphore.
    fn acquire_image(&mut self, slot: usize, timeout: Duration) -> Result<AcquireOutcome>;

    /// Unsignal the slot's fence ahead of a new submission.
    fn reset_slot(&mut self, slot: usize) -> Result<()>;

    /// Re-record the slot's command buffer for `image_index`.
    fn record(&mut self, slot: usize, image_index: u32, content: &Self::Content) -> Result<()>;

    /// Submit the slot's commands, signaling "render complete" and the fence.
    fn submit(&mut self, slot: usize) -> Result<()>;

    /// Present `image_index` once "render complete" is signaled.
    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome>;

    /// The slot's image will not be presented; undo what present would have consumed.
    fn discard_image(&mut self, slot: usize, timeout: Duration) -> Result<()>;

    /// Replace the presentation chain with one for `extent`.
    ///
    /// Implementations wait for the device to go idle before tearing anything down.
    /// Returns false, leaving the old chain in place, when the surface itself
    /// currently reports a zero extent.
    fn rebuild(&mut self, extent: vk::Extent2D) -> Result<bool>;
}

/// Counters kept across the loop's lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopStats {
    pub frames_presented: u64,
    pub presents_skipped: u64,
    pub acquires_out_of_date: u64,
    pub rebuilds: u64,
}

pub struct RenderLoop<B: FrameBackend> {
    backend: B,
    frame: usize,
    state: ChainState,
    gpu_timeout: Duration,
    stats: LoopStats,
}

impl<B: FrameBackend> RenderLoop<B> {
    pub fn new(backend: B, gpu_timeout: Duration) -> Self {
        Self {
            backend,
            frame: 0,
            state: ChainState::Valid,
            gpu_timeout,
            stats: LoopStats::default(),
        }
    }

    /// Run one iteration of the frame protocol.
    pub fn render_frame(
        &mut self,
        platform: &mut dyn Platform,
        content: &B::Content,
    ) -> Result<FrameOutcome> {
        // An explicit resize request (or an abandoned rebuild) is handled before acquire
        if self.state != ChainState::Valid && !self.rebuild(platform)? {
            return Ok(FrameOutcome::Abandoned);
        }

        let slot = self.frame;

        // STEP 1: Wait for the previous submission from this slot
        self.backend.wait_for_slot(slot, self.gpu_timeout)?;

        // STEP 2: Acquire an image
        let mut rebuild_pending = false;
        let image_index = match self.backend.acquire_image(slot, self.gpu_timeout)? {
            AcquireOutcome::Ready(index) => index,
            AcquireOutcome::Suboptimal(index) => {
                log::debug!("Acquired image {} from a suboptimal chain", index);
                rebuild_pending = true;
                index
            }
            AcquireOutcome::OutOfDate => {
                // The fence stays signaled, so retrying this slot won't block
                log::debug!("Chain out of date at acquire, rebuilding");
                self.stats.acquires_out_of_date += 1;
                self.state = ChainState::OutOfDate;
                self.rebuild(platform)?;
                return Ok(FrameOutcome::AcquireFailed);
            }
        };

        // STEP 3: Only now is the slot really going to be reused
        self.backend.reset_slot(slot)?;

        // STEP 4: Record and submit
        self.backend.record(slot, image_index, content)?;
        self.backend.submit(slot)?;

        // STEP 5: Present, unless the window changed under us
        let outcome = if platform.take_resized() {
            log::debug!("Resize signaled, skipping present of image {}", image_index);
            self.backend.discard_image(slot, self.gpu_timeout)?;
            self.stats.presents_skipped += 1;
            self.state = ChainState::OutOfDate;
            FrameOutcome::PresentSkipped
        } else {
            match self.backend.present(slot, image_index)? {
                PresentOutcome::Presented => {}
                PresentOutcome::Suboptimal | PresentOutcome::OutOfDate => rebuild_pending = true,
            }
            self.stats.frames_presented += 1;
            if rebuild_pending {
                self.state = ChainState::OutOfDate;
            }
            FrameOutcome::Presented
        };

        if self.state == ChainState::OutOfDate {
            self.rebuild(platform)?;
        }

        // STEP 6: Advance
        self.frame = next_slot(self.frame, self.backend.slot_count());

        Ok(outcome)
    }

    /// Mark the chain out of date; it is rebuilt at the start of the next frame.
    pub fn request_rebuild(&mut self) {
        self.state = ChainState::OutOfDate;
    }

    /// Returns false if the platform started closing before a size appeared.
    fn rebuild(&mut self, platform: &mut dyn Platform) -> Result<bool> {
        self.state = ChainState::Rebuilding;

        loop {
            let Some(extent) = wait_for_visible_extent(platform) else {
                self.state = ChainState::OutOfDate;
                return Ok(false);
            };
            log::info!("Rebuilding presentation chain at {}x{}", extent.width, extent.height);
            if self.backend.rebuild(extent)? {
                break;
            }

            // The window reported a size but the surface is still zero-sized
            log::debug!("Surface has no extent yet, waiting for events");
            if platform.is_closing() {
                self.state = ChainState::OutOfDate;
                return Ok(false);
            }
            platform.wait_events();
        }

        // The new chain already matches the current size
        platform.take_resized();

        self.stats.rebuilds += 1;
        self.state = ChainState::Valid;
        Ok(true)
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    pub fn frame_index(&self) -> usize {
        self.frame
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

/// Block on the platform's event pump until the framebuffer has a non-zero size.
///
/// Gives up with `None` if the platform starts closing while minimized.
pub fn wait_for_visible_extent(platform: &mut dyn Platform) -> Option<vk::Extent2D> {
    let (mut width, mut height) = platform.framebuffer_size();
    if width == 0 || height == 0 {
        log::info!("Window minimized, waiting for it to be restored");
    }
    while width == 0 || height == 0 {
        if platform.is_closing() {
            return None;
        }
        platform.wait_events();
        (width, height) = platform.framebuffer_size();
    }
    Some(vk::Extent2D { width, height })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Every call the loop makes, in order.
    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Acquire(usize),
        Reset(usize),
        Record(usize, u32),
        Submit(usize),
        Present(usize, u32),
        Discard(usize),
        Rebuild(u32, u32),
    }

    /// In-memory GPU that tracks fence state per slot and panics on misuse.
    struct ScriptedBackend {
        slots: usize,
        acquires: VecDeque<AcquireOutcome>,
        presents: VecDeque<PresentOutcome>,
        next_image: u32,
        /// Rebuild attempts that find the surface still zero-sized.
        zero_surface_rebuilds: usize,
        /// Submitted and not yet observed complete by a wait.
        in_flight: Vec<bool>,
        /// Fence state as the CPU would see it.
        signaled: Vec<bool>,
        /// Wait observed since the last submission.
        waited: Vec<bool>,
        calls: Vec<Call>,
    }

    impl ScriptedBackend {
        fn new(slots: usize) -> Self {
            Self {
                slots,
                acquires: VecDeque::new(),
                presents: VecDeque::new(),
                next_image: 0,
                zero_surface_rebuilds: 0,
                in_flight: vec![false; slots],
                signaled: vec![true; slots],
                waited: vec![false; slots],
                calls: Vec::new(),
            }
        }

        fn with_acquires(mut self, acquires: &[AcquireOutcome]) -> Self {
            self.acquires = acquires.iter().copied().collect();
            self
        }

        fn with_presents(mut self, presents: &[PresentOutcome]) -> Self {
            self.presents = presents.iter().copied().collect();
            self
        }

        fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
            self.calls.iter().filter(|c| pred(c)).count()
        }

        fn waited_slots(&self) -> Vec<usize> {
            self.calls
                .iter()
                .filter_map(|c| match c {
                    Call::Wait(slot) => Some(*slot),
                    _ => None,
                })
                .collect()
        }

        fn rebuild_extents(&self) -> Vec<(u32, u32)> {
            self.calls
                .iter()
                .filter_map(|c| match c {
                    Call::Rebuild(w, h) => Some((*w, *h)),
                    _ => None,
                })
                .collect()
        }
    }

    impl FrameBackend for ScriptedBackend {
        type Content = ();

        fn slot_count(&self) -> usize {
            self.slots
        }

        fn wait_for_slot(&mut self, slot: usize, _timeout: Duration) -> Result<()> {
            self.calls.push(Call::Wait(slot));
            // The simulated GPU finishes as soon as someone waits
            self.in_flight[slot] = false;
            self.signaled[slot] = true;
            self.waited[slot] = true;
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize, _timeout: Duration) -> Result<AcquireOutcome> {
            self.calls.push(Call::Acquire(slot));
            let outcome = self.acquires.pop_front().unwrap_or(AcquireOutcome::Ready(0));
            let outcome = match outcome {
                AcquireOutcome::Ready(_) => AcquireOutcome::Ready(self.next_image),
                AcquireOutcome::Suboptimal(_) => AcquireOutcome::Suboptimal(self.next_image),
                AcquireOutcome::OutOfDate => AcquireOutcome::OutOfDate,
            };
            if outcome != AcquireOutcome::OutOfDate {
                self.next_image = (self.next_image + 1) % 3;
            }
            Ok(outcome)
        }

        fn reset_slot(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Reset(slot));
            assert!(self.signaled[slot], "reset of slot {slot} before its fence signaled");
            self.signaled[slot] = false;
            Ok(())
        }

        fn record(&mut self, slot: usize, image_index: u32, _content: &()) -> Result<()> {
            self.calls.push(Call::Record(slot, image_index));
            assert!(!self.in_flight[slot], "slot {slot} re-recorded while in flight");
            assert!(self.waited[slot], "slot {slot} re-recorded without a fence wait");
            assert!(!self.signaled[slot], "slot {slot} recorded before its fence was reset");
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Submit(slot));
            self.in_flight[slot] = true;
            self.waited[slot] = false;
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
            self.calls.push(Call::Present(slot, image_index));
            Ok(self.presents.pop_front().unwrap_or(PresentOutcome::Presented))
        }

        fn discard_image(&mut self, slot: usize, _timeout: Duration) -> Result<()> {
            self.calls.push(Call::Discard(slot));
            self.in_flight[slot] = false;
            self.signaled[slot] = true;
            self.waited[slot] = true;
            Ok(())
        }

        fn rebuild(&mut self, extent: vk::Extent2D) -> Result<bool> {
            assert!(extent.width > 0 && extent.height > 0, "rebuild with zero extent");
            self.calls.push(Call::Rebuild(extent.width, extent.height));
            // Device idle: nothing is in flight any more
            self.in_flight.iter_mut().for_each(|f| *f = false);
            if self.zero_surface_rebuilds > 0 {
                self.zero_surface_rebuilds -= 1;
                return Ok(false);
            }
            self.next_image = 0;
            Ok(true)
        }
    }

    /// Platform whose size answers and resize signals are scripted.
    struct ScriptedPlatform {
        sizes: VecDeque<(u32, u32)>,
        steady_size: (u32, u32),
        resizes: VecDeque<bool>,
        waits: usize,
    }

    impl ScriptedPlatform {
        fn new() -> Self {
            Self {
                sizes: VecDeque::new(),
                steady_size: (800, 600),
                resizes: VecDeque::new(),
                waits: 0,
            }
        }
    }

    impl Platform for ScriptedPlatform {
        fn framebuffer_size(&self) -> (u32, u32) {
            self.sizes.front().copied().unwrap_or(self.steady_size)
        }

        fn wait_events(&mut self) {
            self.waits += 1;
            self.sizes.pop_front();
        }

        fn take_resized(&mut self) -> bool {
            self.resizes.pop_front().unwrap_or(false)
        }
    }

    fn run(
        render_loop: &mut RenderLoop<ScriptedBackend>,
        platform: &mut ScriptedPlatform,
        n: usize,
    ) -> Vec<FrameOutcome> {
        (0..n)
            .map(|_| render_loop.render_frame(platform, &()).unwrap())
            .collect()
    }

    const TIMEOUT: Duration = Duration::from_millis(100);

    #[test]
    fn two_slots_alternate_strictly() {
        let mut render_loop = RenderLoop::new(ScriptedBackend::new(2), TIMEOUT);
        let mut platform = ScriptedPlatform::new();

        let outcomes = run(&mut render_loop, &mut platform, 7);

        assert!(outcomes.iter().all(|o| *o == FrameOutcome::Presented));
        assert_eq!(render_loop.backend().waited_slots(), [0, 1, 0, 1, 0, 1, 0]);
        assert_eq!(render_loop.frame_index(), 1);
        assert_eq!(render_loop.stats().rebuilds, 0);
    }

    #[test]
    fn three_slots_cycle_in_order() {
        let mut render_loop = RenderLoop::new(ScriptedBackend::new(3), TIMEOUT);
        let mut platform = ScriptedPlatform::new();

        run(&mut render_loop, &mut platform, 10);

        let expected: Vec<usize> = (0..10).map(|i| i % 3).collect();
        assert_eq!(render_loop.backend().waited_slots(), expected);
    }

    #[test]
    fn each_cycle_follows_the_protocol_order() {
        let mut render_loop = RenderLoop::new(ScriptedBackend::new(2), TIMEOUT);
        let mut platform = ScriptedPlatform::new();

        run(&mut render_loop, &mut platform, 2);

        assert_eq!(
            render_loop.backend().calls,
            [
                Call::Wait(0),
                Call::Acquire(0),
                Call::Reset(0),
                Call::Record(0, 0),
                Call::Submit(0),
                Call::Present(0, 0),
                Call::Wait(1),
                Call::Acquire(1),
                Call::Reset(1),
                Call::Record(1, 1),
                Call::Submit(1),
                Call::Present(1, 1),
            ]
        );
    }

    #[test]
    fn acquire_sequence_rebuilds_twice() {
        use AcquireOutcome::*;
        let backend = ScriptedBackend::new(2)
            .with_acquires(&[Ready(0), OutOfDate, Ready(0), Suboptimal(0), Ready(0)]);
        let mut render_loop = RenderLoop::new(backend, TIMEOUT);
        let mut platform = ScriptedPlatform::new();

        let outcomes = run(&mut render_loop, &mut platform, 5);

        assert_eq!(
            outcomes,
            [
                FrameOutcome::Presented,
                FrameOutcome::AcquireFailed,
                FrameOutcome::Presented,
                FrameOutcome::Presented,
                FrameOutcome::Presented,
            ]
        );
        let backend = render_loop.backend();
        assert_eq!(backend.count(|c| matches!(c, Call::Rebuild(..))), 2);
        assert_eq!(backend.count(|c| matches!(c, Call::Present(..))), 4);
        assert_eq!(render_loop.stats().rebuilds, 2);
        assert_eq!(render_loop.stats().acquires_out_of_date, 1);
        assert_eq!(render_loop.state(), ChainState::Valid);
    }

    #[test]
    fn out_of_date_acquire_keeps_the_slot_and_its_fence() {
        let backend = ScriptedBackend::new(2).with_acquires(&[AcquireOutcome::OutOfDate]);
        let mut render_loop = RenderLoop::new(backend, TIMEOUT);
        let mut platform = ScriptedPlatform::new();

        run(&mut render_loop, &mut platform, 2);

        let backend = render_loop.backend();
        assert_eq!(
            &backend.calls[..4],
            [Call::Wait(0), Call::Acquire(0), Call::Rebuild(800, 600), Call::Wait(0)]
        );
        // The failed cycle never reset the fence, so the retry could wait on it
        assert_eq!(backend.count(|c| *c == Call::Reset(0)), 1);
    }

    #[test]
    fn suboptimal_acquire_rebuilds_after_presenting() {
        let backend = ScriptedBackend::new(2).with_acquires(&[AcquireOutcome::Suboptimal(0)]);
        let mut render_loop = RenderLoop::new(backend, TIMEOUT);
        let mut platform = ScriptedPlatform::new();

        run(&mut render_loop, &mut platform, 1);

        let calls = &render_loop.backend().calls;
        assert_eq!(calls[calls.len() - 2], Call::Present(0, 0));
        assert_eq!(calls[calls.len() - 1], Call::Rebuild(800, 600));
    }

    #[test]
    fn present_out_of_date_or_suboptimal_triggers_rebuild() {
        let backend = ScriptedBackend::new(2).with_presents(&[
            PresentOutcome::OutOfDate,
            PresentOutcome::Presented,
            PresentOutcome::Suboptimal,
        ]);
        let mut render_loop = RenderLoop::new(backend, TIMEOUT);
        let mut platform = ScriptedPlatform::new();

        run(&mut render_loop, &mut platform, 3);

        assert_eq!(render_loop.stats().rebuilds, 2);
        assert_eq!(render_loop.stats().frames_presented, 3);
    }

    #[test]
    fn resize_skips_present_and_rebuilds() {
        let mut render_loop = RenderLoop::new(ScriptedBackend::new(2), TIMEOUT);
        let mut platform = ScriptedPlatform::new();
        platform.resizes = [false, true, false].into_iter().collect();
        platform.steady_size = (1024, 768);

        let outcomes = run(&mut render_loop, &mut platform, 3);

        assert_eq!(
            outcomes,
            [FrameOutcome::Presented, FrameOutcome::PresentSkipped, FrameOutcome::Presented]
        );
        let backend = render_loop.backend();
        assert!(!backend.calls.contains(&Call::Present(1, 1)));
        assert_eq!(backend.rebuild_extents(), [(1024, 768)]);
        let discard = backend.calls.iter().position(|c| *c == Call::Discard(1)).unwrap();
        assert_eq!(backend.calls[discard + 1], Call::Rebuild(1024, 768));
        // The skipped frame still consumed its slot
        assert_eq!(backend.waited_slots(), [0, 1, 0]);
    }

    #[test]
    fn resize_pending_at_a_stale_acquire_is_absorbed_by_the_rebuild() {
        let backend = ScriptedBackend::new(2).with_acquires(&[AcquireOutcome::OutOfDate]);
        let mut render_loop = RenderLoop::new(backend, TIMEOUT);
        let mut platform = ScriptedPlatform::new();
        platform.resizes = [true].into_iter().collect();

        let outcomes = run(&mut render_loop, &mut platform, 3);

        assert_eq!(
            outcomes,
            [FrameOutcome::AcquireFailed, FrameOutcome::Presented, FrameOutcome::Presented]
        );
        assert_eq!(render_loop.stats().rebuilds, 1);
        assert_eq!(render_loop.stats().presents_skipped, 0);
        let backend = render_loop.backend();
        assert_eq!(backend.count(|c| matches!(c, Call::Discard(_))), 0);
        assert_eq!(backend.rebuild_extents(), [(800, 600)]);
    }

    #[test]
    fn zero_sized_surface_waits_instead_of_failing() {
        let mut backend = ScriptedBackend::new(2);
        backend.zero_surface_rebuilds = 2;
        let mut render_loop = RenderLoop::new(backend, TIMEOUT);
        let mut platform = ScriptedPlatform::new();

        render_loop.request_rebuild();
        let outcome = render_loop.render_frame(&mut platform, &()).unwrap();

        assert_eq!(outcome, FrameOutcome::Presented);
        assert_eq!(platform.waits, 2);
        assert_eq!(render_loop.state(), ChainState::Valid);
        assert_eq!(render_loop.stats().rebuilds, 1);
        assert_eq!(render_loop.backend().rebuild_extents(), [(800, 600); 3]);
    }

    #[test]
    fn zero_sized_surface_while_closing_abandons_the_rebuild() {
        struct ClosingVisible;

        impl Platform for ClosingVisible {
            fn framebuffer_size(&self) -> (u32, u32) {
                (800, 600)
            }
            fn wait_events(&mut self) {
                panic!("must not block once closing");
            }
            fn take_resized(&mut self) -> bool {
                false
            }
            fn is_closing(&self) -> bool {
                true
            }
        }

        let mut backend = ScriptedBackend::new(2);
        backend.zero_surface_rebuilds = 1;
        let mut render_loop = RenderLoop::new(backend, TIMEOUT);
        render_loop.request_rebuild();

        let outcome = render_loop.render_frame(&mut ClosingVisible, &()).unwrap();

        assert_eq!(outcome, FrameOutcome::Abandoned);
        assert_eq!(render_loop.state(), ChainState::OutOfDate);
        assert_eq!(render_loop.stats().rebuilds, 0);
    }

    #[test]
    fn minimized_window_blocks_until_restored() {
        const K: usize = 4;
        let backend = ScriptedBackend::new(2).with_acquires(&[AcquireOutcome::OutOfDate]);
        let mut render_loop = RenderLoop::new(backend, TIMEOUT);
        let mut platform = ScriptedPlatform::new();
        platform.sizes = std::iter::repeat((0, 0)).take(K).collect();
        platform.steady_size = (640, 480);

        run(&mut render_loop, &mut platform, 1);

        assert_eq!(platform.waits, K);
        assert_eq!(render_loop.backend().rebuild_extents(), [(640, 480)]);
    }

    #[test]
    fn half_zero_extent_still_counts_as_minimized() {
        let mut platform = ScriptedPlatform::new();
        platform.sizes = [(0, 600), (800, 0)].into_iter().collect();
        platform.steady_size = (800, 600);

        let extent = wait_for_visible_extent(&mut platform).unwrap();

        assert_eq!(platform.waits, 2);
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn visible_window_does_not_wait() {
        let mut platform = ScriptedPlatform::new();
        wait_for_visible_extent(&mut platform);
        assert_eq!(platform.waits, 0);
    }

    #[test]
    fn closing_while_minimized_abandons_the_rebuild() {
        struct Closing;

        impl Platform for Closing {
            fn framebuffer_size(&self) -> (u32, u32) {
                (0, 0)
            }
            fn wait_events(&mut self) {
                panic!("must not block once closing");
            }
            fn take_resized(&mut self) -> bool {
                false
            }
            fn is_closing(&self) -> bool {
                true
            }
        }

        let mut render_loop = RenderLoop::new(ScriptedBackend::new(2), TIMEOUT);
        render_loop.request_rebuild();

        let outcome = render_loop.render_frame(&mut Closing, &()).unwrap();

        assert_eq!(outcome, FrameOutcome::Abandoned);
        assert_eq!(render_loop.state(), ChainState::OutOfDate);
        assert!(render_loop.backend().calls.is_empty());
    }

    #[test]
    fn requested_rebuild_happens_before_next_acquire() {
        let mut render_loop = RenderLoop::new(ScriptedBackend::new(2), TIMEOUT);
        let mut platform = ScriptedPlatform::new();

        render_loop.request_rebuild();
        assert_eq!(render_loop.state(), ChainState::OutOfDate);
        run(&mut render_loop, &mut platform, 1);

        assert_eq!(render_loop.backend().calls[0], Call::Rebuild(800, 600));
        assert_eq!(render_loop.backend().calls[1], Call::Wait(0));
        assert_eq!(render_loop.state(), ChainState::Valid);
    }

    #[test]
    fn long_run_with_mixed_events_never_reuses_an_in_flight_slot() {
        use AcquireOutcome::*;
        let acquires: Vec<_> = (0..60)
            .map(|i| match i % 7 {
                3 => OutOfDate,
                5 => Suboptimal(0),
                _ => Ready(0),
            })
            .collect();
        let backend = ScriptedBackend::new(3).with_acquires(&acquires);
        let mut render_loop = RenderLoop::new(backend, TIMEOUT);
        let mut platform = ScriptedPlatform::new();
        platform.resizes = (0..60).map(|i| i % 11 == 10).collect();

        // ScriptedBackend asserts the wait -> reset -> record ordering on every call
        run(&mut render_loop, &mut platform, 60);

        let stats = render_loop.stats();
        assert_eq!(
            stats.frames_presented + stats.presents_skipped + stats.acquires_out_of_date,
            60
        );
    }

    #[test]
    fn errors_propagate_out_of_the_loop() {
        struct LostDevice(ScriptedBackend);

        impl FrameBackend for LostDevice {
            type Content = ();
            fn slot_count(&self) -> usize {
                self.0.slot_count()
            }
            fn wait_for_slot(&mut self, _slot: usize, timeout: Duration) -> Result<()> {
                Err(crate::error::RenderError::from_wait(
                    "wait_for_fences",
                    vk::Result::TIMEOUT,
                    timeout,
                )
                .into())
            }
            fn acquire_image(&mut self, slot: usize, t: Duration) -> Result<AcquireOutcome> {
                self.0.acquire_image(slot, t)
            }
            fn reset_slot(&mut self, slot: usize) -> Result<()> {
                self.0.reset_slot(slot)
            }
            fn record(&mut self, slot: usize, image: u32, content: &()) -> Result<()> {
                self.0.record(slot, image, content)
            }
            fn submit(&mut self, slot: usize) -> Result<()> {
                self.0.submit(slot)
            }
            fn present(&mut self, slot: usize, image: u32) -> Result<PresentOutcome> {
                self.0.present(slot, image)
            }
            fn discard_image(&mut self, slot: usize, t: Duration) -> Result<()> {
                self.0.discard_image(slot, t)
            }
            fn rebuild(&mut self, extent: vk::Extent2D) -> Result<bool> {
                self.0.rebuild(extent)
            }
        }

        let mut render_loop = RenderLoop::new(LostDevice(ScriptedBackend::new(2)), TIMEOUT);
        let mut platform = ScriptedPlatform::new();

        let err = render_loop.render_frame(&mut platform, &()).unwrap_err();
        assert_eq!(crate::error::classify(&err), crate::error::ErrorKind::DeviceLost);
        assert!(render_loop.backend().0.calls.is_empty());
    }
}
