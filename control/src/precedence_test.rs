use super::*;
use proptest::prelude::*;

fn flags_from_bits(bits: u8) -> OverrideFlags {
    let mut flags = OverrideFlags::default();
    for (i, flag) in Flag::PRIORITY.into_iter().enumerate() {
        flags.set(flag, bits & (1 << i) != 0);
    }
    flags
}

#[test]
fn no_flags_shows_slide() {
    assert_eq!(resolve(&OverrideFlags::default(), 7), EffectiveView::Slide(7));
}

#[test]
fn each_flag_alone_yields_its_sentinel() {
    for flag in Flag::PRIORITY {
        let mut flags = OverrideFlags::default();
        flags.set(flag, true);
        assert_eq!(resolve(&flags, 2), flag.view(), "flag {flag}");
    }
}

#[test]
fn cover_over_black_keeps_stopped_underneath() {
    let mut flags = OverrideFlags::default();
    flags.set(Flag::Black, true);
    assert_eq!(resolve(&flags, 0), EffectiveView::Black);

    flags.set(Flag::Cover, true);
    assert_eq!(resolve(&flags, 0), EffectiveView::Cover);

    flags.set(Flag::Stopped, true);
    assert_eq!(resolve(&flags, 0), EffectiveView::Stopped);

    flags.set(Flag::Stopped, false);
    flags.set(Flag::Cover, false);
    assert_eq!(resolve(&flags, 0), EffectiveView::Black);
}

#[test]
fn sentinels_are_negative_and_distinct() {
    let mut seen = std::collections::HashSet::new();
    for flag in Flag::PRIORITY {
        let index = flag.view().to_index();
        assert!(index < 0);
        assert!(seen.insert(index), "duplicate sentinel {index}");
    }
}

#[test]
fn wire_sentinel_values() {
    assert_eq!(EffectiveView::Black.to_index(), -1);
    assert_eq!(EffectiveView::Clear.to_index(), -2);
    assert_eq!(EffectiveView::Stopped.to_index(), -3);
    assert_eq!(EffectiveView::Transparent.to_index(), -4);
    assert_eq!(EffectiveView::Cover.to_index(), -5);
}

#[test]
fn from_index_rejects_unknown_negative() {
    assert_eq!(EffectiveView::from_index(-9), None);
    assert_eq!(EffectiveView::from_index(4), Some(EffectiveView::Slide(4)));
}

#[test]
fn set_reports_change() {
    let mut flags = OverrideFlags::default();
    assert!(flags.set(Flag::Clear, true));
    assert!(!flags.set(Flag::Clear, true));
    assert!(flags.set(Flag::Clear, false));
}

#[test]
fn flag_names_parse() {
    assert_eq!("transparent".parse::<Flag>(), Ok(Flag::Transparent));
    assert_eq!("Black".parse::<Flag>(), Err(UnknownFlag("Black".into())));
}

proptest! {
    #[test]
    fn resolve_picks_highest_set_flag(bits in 0u8..32, slide in 0usize..500) {
        let flags = flags_from_bits(bits);
        let expected = Flag::PRIORITY
            .into_iter()
            .find(|flag| flags.get(*flag))
            .map_or(EffectiveView::Slide(slide), Flag::view);

        prop_assert_eq!(resolve(&flags, slide), expected);
        prop_assert_eq!(resolve(&flags, slide), resolve(&flags, slide));
    }

    #[test]
    fn wire_index_round_trips(bits in 0u8..32, slide in 0usize..500) {
        let view = resolve(&flags_from_bits(bits), slide);
        prop_assert_eq!(EffectiveView::from_index(view.to_index()), Some(view));
    }
}
