//! Expands a [`CyclePlan`] into the literal instruction list a board session uploads.
//!
//! ## Structures
//!
//! - [`PulseInstruction`]: one contiguous segment of the cycle during which the output
//!   flag word is constant. Bit `n` of `flags` is the state of channel `n`.
//! - [`PulseProgram`]: the gap-free list of segments covering `[0, cycle_width)`, the
//!   repeat mode and the clock-cycle count handed back to acquisition code.
//!
//! ## Building
//!
//! 1. The clock line is synthesized as a 50% duty square wave at the plan's clock period.
//!    Only whole periods are emitted; a partial trailing period is dropped.
//! 2. Every interval (plan intervals plus clock half-periods) contributes a rising and a
//!    falling edge. Edges are swept in time order, keeping a per-channel count of active
//!    intervals, so overlapping intervals on one channel simply stay high.
//! 3. Each span between consecutive edge times becomes a segment whose flag word has the
//!    bits of all active channels. Neighbouring segments with equal flag words are merged.
//!
//! Playback is always an infinite repeat of the one cycle.

use std::collections::BTreeMap;
use std::fmt;

use ndarray::Array2;
use tracing::trace;

use crate::channel::*;
use crate::plan::CyclePlan;
use crate::utils::clock_cycle_count;

/// How often the committed cycle is played back. The board only ever loops the cycle
/// forever; there is no finite-repeat mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    Infinite,
}

/// A segment of constant output state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseInstruction {
    pub flags: u32,
    pub start_ns: u64,
    pub duration_ns: u64,
}

impl PulseInstruction {
    pub fn end_ns(&self) -> u64 {
        self.start_ns + self.duration_ns
    }

    pub fn is_high(&self, channel: Channel) -> bool {
        self.flags & channel.mask() != 0
    }
}

impl fmt::Display for PulseInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#026b} @ {} ns for {} ns",
            self.flags, self.start_ns, self.duration_ns
        )
    }
}

/// Half-period-high intervals of the clock line over `[0, cycle_width)`.
///
/// The number of periods is `cycle_width / clock_period`, truncated. Returns an empty
/// list when the plan has no clock channel.
pub fn clock_intervals(plan: &CyclePlan) -> Vec<PulseInterval> {
    let Some(clock) = plan.clock_channel() else {
        return Vec::new();
    };
    let period = plan.clock_period_ns();
    let high = period / 2;
    let n_periods = plan.cycle_width_ns() / period;
    (0..n_periods)
        .map(|k| PulseInterval::new(clock, k * period, high))
        .collect()
}

/// The instruction list for one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulseProgram {
    pins: Vec<Channel>,
    instructions: Vec<PulseInstruction>,
    cycle_width_ns: u64,
    clock_period_ns: u64,
    clock_cycle_count: u64,
    repeat: Repeat,
}

impl PulseProgram {
    /// Expands a validated plan.
    ///
    /// Plans only exist in validated form (non-negative starts, positive durations,
    /// nothing past the cycle end), so building cannot fail.
    ///
    /// # Example
    ///
    /// ```
    /// use pbcompiler_backend::*;
    ///
    /// let pins = [Channel(0), Channel(1)];
    /// let mut plan = CyclePlan::new(&pins, 1_000, None, 200, 0).unwrap();
    /// plan.on(Channel(0), 0, 1_000).unwrap();
    /// plan.on(Channel(1), 0, 500).unwrap();
    ///
    /// let program = PulseProgram::build(&plan);
    /// let flags: Vec<u32> = program.instructions().iter().map(|i| i.flags).collect();
    /// assert_eq!(flags, vec![0b11, 0b01]);
    /// assert_eq!(program.clock_cycle_count(), 5);
    /// ```
    pub fn build(plan: &CyclePlan) -> Self {
        let cycle_width = plan.cycle_width_ns();

        // time -> (channel, +1 rising / -1 falling)
        let mut edges: BTreeMap<i64, Vec<(Channel, i32)>> = BTreeMap::new();
        edges.entry(0).or_default();
        edges.entry(cycle_width).or_default();
        let clock = clock_intervals(plan);
        for iv in plan.intervals().iter().chain(clock.iter()) {
            edges.entry(iv.start_ns).or_default().push((iv.channel, 1));
            edges.entry(iv.end_ns()).or_default().push((iv.channel, -1));
        }

        let mut active = [0i32; MAX_CHANNELS as usize];
        let mut instructions: Vec<PulseInstruction> = Vec::new();
        let times: Vec<i64> = edges.keys().copied().collect();
        for (i, &t) in times.iter().enumerate() {
            for &(channel, delta) in &edges[&t] {
                active[channel.index() as usize] += delta;
            }
            let Some(&next) = times.get(i + 1) else {
                break;
            };
            let flags = active
                .iter()
                .enumerate()
                .filter(|(_, count)| **count > 0)
                .fold(0u32, |acc, (bit, _)| acc | (1 << bit));
            // Merge with the previous segment, if possible
            match instructions.last_mut() {
                Some(last) if last.flags == flags => last.duration_ns += (next - t) as u64,
                _ => instructions.push(PulseInstruction {
                    flags,
                    start_ns: t as u64,
                    duration_ns: (next - t) as u64,
                }),
            }
        }

        let cycle_width_ns = cycle_width as u64;
        let clock_period_ns = plan.clock_period_ns() as u64;
        trace!(
            cycle_width_ns,
            n_instructions = instructions.len(),
            "expanded cycle plan"
        );
        Self {
            pins: plan.pins().to_vec(),
            instructions,
            cycle_width_ns,
            clock_period_ns,
            clock_cycle_count: clock_cycle_count(cycle_width_ns, clock_period_ns),
            repeat: Repeat::Infinite,
        }
    }

    pub fn instructions(&self) -> &[PulseInstruction] {
        &self.instructions
    }

    pub fn pins(&self) -> &[Channel] {
        &self.pins
    }

    pub fn cycle_width_ns(&self) -> u64 {
        self.cycle_width_ns
    }

    pub fn clock_period_ns(&self) -> u64 {
        self.clock_period_ns
    }

    /// `round(cycle_width / clock_period)`, the per-cycle sample count for a DAQ card
    /// clocked from the clock channel.
    pub fn clock_cycle_count(&self) -> u64 {
        self.clock_cycle_count
    }

    pub fn repeat(&self) -> Repeat {
        self.repeat
    }

    /// Index of the instruction playing at `t_ns` (which must lie within the cycle).
    fn instr_idx_at(&self, t_ns: u64) -> usize {
        self.instructions
            .partition_point(|instr| instr.end_ns() <= t_ns)
            .min(self.instructions.len() - 1)
    }

    /// Output state of `channel` at `t_ns` into the cycle.
    pub fn level_at(&self, channel: Channel, t_ns: u64) -> bool {
        if self.instructions.is_empty() || t_ns >= self.cycle_width_ns {
            return false;
        }
        self.instructions[self.instr_idx_at(t_ns)].is_high(channel)
    }

    /// Samples every pin's output level (0.0 / 1.0) at `nsamps` evenly spaced points
    /// across the cycle.
    ///
    /// The first axis follows [`PulseProgram::pins`], the second is the sample index.
    /// Sample `i` is taken at `floor(i * cycle_width / nsamps)` ns.
    pub fn calc_levels(&self, nsamps: usize) -> Array2<f64> {
        let mut buffer = Array2::from_elem((self.pins.len(), nsamps), 0.);
        if self.instructions.is_empty() {
            return buffer;
        }
        for i in 0..nsamps {
            let t_ns = (i as u128 * self.cycle_width_ns as u128 / nsamps as u128) as u64;
            let instr = self.instructions[self.instr_idx_at(t_ns)];
            for (row, &pin) in self.pins.iter().enumerate() {
                if instr.is_high(pin) {
                    buffer[[row, i]] = 1.;
                }
            }
        }
        buffer
    }
}

#[cfg(test)]
mod test {
    use crate::instruction::*;

    fn plan(cycle_width_ns: i64, clock_period_ns: i64) -> CyclePlan {
        let pins = [Channel(0), Channel(1), Channel(2), Channel(3)];
        CyclePlan::new(&pins, cycle_width_ns, Some(Channel(2)), clock_period_ns, 500).unwrap()
    }

    mod clock {
        use super::*;

        #[test]
        fn whole_periods_only() {
            let clock = clock_intervals(&plan(1_000, 300));
            let spans: Vec<(i64, i64)> = clock.iter().map(|iv| iv.span()).collect();
            assert_eq!(spans, vec![(0, 150), (300, 150), (600, 150)]);
        }

        #[test]
        /// Odd periods keep the high half at `floor(period / 2)`.
        fn odd_period() {
            let clock = clock_intervals(&plan(10, 5));
            let spans: Vec<(i64, i64)> = clock.iter().map(|iv| iv.span()).collect();
            assert_eq!(spans, vec![(0, 2), (5, 2)]);
        }

        #[test]
        fn no_clock_channel() {
            let plan = CyclePlan::new(&[Channel(0)], 1_000, None, 200, 0).unwrap();
            assert!(clock_intervals(&plan).is_empty());
        }
    }

    #[test]
    /// Segments are contiguous, start at zero, and end exactly at the cycle width.
    fn segments_tile_the_cycle() {
        let mut p = plan(10_000, 200);
        p.trigger(Channel(3)).unwrap();
        p.on(Channel(0), 0, 10_000).unwrap();
        p.on(Channel(1), 0, 5_000).unwrap();
        let program = PulseProgram::build(&p);

        let instrs = program.instructions();
        assert_eq!(instrs.first().unwrap().start_ns, 0);
        assert_eq!(instrs.last().unwrap().end_ns(), 10_000);
        for pair in instrs.windows(2) {
            assert_eq!(pair[0].end_ns(), pair[1].start_ns);
            assert_ne!(pair[0].flags, pair[1].flags);
        }
        assert_eq!(program.clock_cycle_count(), 50);
        assert_eq!(program.repeat(), Repeat::Infinite);
    }

    #[test]
    /// Overlapping intervals on one channel OR together instead of toggling off.
    fn overlapping_intervals_merge() {
        let pins = [Channel(1)];
        let mut p = CyclePlan::new(&pins, 1_000, None, 200, 0).unwrap();
        p.on(Channel(1), 100, 300).unwrap();
        p.on(Channel(1), 200, 300).unwrap();
        let program = PulseProgram::build(&p);
        let segs: Vec<(u32, u64, u64)> = program
            .instructions()
            .iter()
            .map(|i| (i.flags, i.start_ns, i.duration_ns))
            .collect();
        assert_eq!(segs, vec![(0, 0, 100), (0b10, 100, 400), (0, 500, 500)]);
    }

    #[test]
    fn levels_follow_the_plan() {
        let mut p = plan(1_000, 200);
        p.on(Channel(0), 0, 1_000).unwrap();
        p.on(Channel(1), 500, 250).unwrap();
        let program = PulseProgram::build(&p);

        assert!(program.level_at(Channel(0), 999));
        assert!(!program.level_at(Channel(1), 499));
        assert!(program.level_at(Channel(1), 500));
        assert!(!program.level_at(Channel(1), 750));
        assert!(program.level_at(Channel(2), 0));
        assert!(!program.level_at(Channel(2), 100));
        assert!(!program.level_at(Channel(0), 1_000));

        let levels = program.calc_levels(10);
        assert_eq!(levels.dim(), (4, 10));
        // pins are [0, 1, 2, 3]; samples every 100 ns
        assert!(levels.row(0).iter().all(|&v| v == 1.));
        assert_eq!(levels.row(1).to_vec(), vec![0., 0., 0., 0., 0., 1., 1., 1., 0., 0.]);
        assert_eq!(levels.row(2).to_vec(), vec![1., 0., 1., 0., 1., 0., 1., 0., 1., 0.]);
        assert!(levels.row(3).iter().all(|&v| v == 0.));
    }
}
