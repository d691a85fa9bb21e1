pub type Ticks = u32;

pub trait TickSource {
    fn now(&self) -> Ticks;
}

impl<F> TickSource for F
where
    F: Fn() -> Ticks,
{
    fn now(&self) -> Ticks {
        self()
    }
}

pub const fn elapsed(now: Ticks, reference: Ticks) -> Ticks {
    now.wrapping_sub(reference)
}

// Never rewrite this as `now >= reference + span`: that form breaks as soon as
// `reference + span` overflows.
pub const fn has_elapsed(now: Ticks, reference: Ticks, span: Ticks) -> bool {
    elapsed(now, reference) >= span
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_without_wrap() {
        assert_eq!(elapsed(1_500, 1_000), 500);
        assert_eq!(elapsed(1_000, 1_000), 0);
    }

    #[test]
    fn elapsed_across_wrap() {
        let reference = u32::MAX - 9;
        for gap in [0_u32, 1, 9, 10, 11, 1_000, 2_000_000] {
            let now = reference.wrapping_add(gap);
            assert_eq!(elapsed(now, reference), gap, "gap {gap}");
        }
    }

    #[test]
    fn elapsed_covers_full_range() {
        let reference = u32::MAX;
        assert_eq!(elapsed(reference.wrapping_add(u32::MAX), reference), u32::MAX);
        assert_eq!(elapsed(u32::MAX - 1, u32::MAX), u32::MAX);
    }

    #[test]
    fn has_elapsed_at_wrap_boundary() {
        let reference = u32::MAX - 4;

        // reference + 10 overflows to 5; a naive `now >= reference + 10` would fire at once.
        assert!(!has_elapsed(u32::MAX, reference, 10));
        assert!(!has_elapsed(4, reference, 10));
        assert!(has_elapsed(5, reference, 10));
        assert!(has_elapsed(6, reference, 10));
    }

    #[test]
    fn closures_are_tick_sources() {
        let source = || 42;
        assert_eq!(source.now(), 42);
    }
}
