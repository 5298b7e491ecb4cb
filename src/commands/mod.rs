//! The `cuda …` and `info cuda …` command surface.
//!
//! The host debugger's command machinery tokenizes and registers the
//! commands; the core receives the raw argument strings, parses them with
//! the coordinate grammar, and renders results through the host's sinks.

use crate::api::DebugApi;
use crate::coords::parser::{self, AcceptedCommands, CommandKind, DefaultValue};
use crate::coords::Coords;
use crate::error::Error;
use crate::host::{HostDebugger, InfoSink};
use crate::session::CudaCore;

mod info;

impl<A: DebugApi, H: HostDebugger> CudaCore<A, H> {
    /// Turn an `info cuda` filter string into an evaluated coordinate
    /// filter, falling back to the view's default filter when no string is
    /// given.
    pub(crate) fn build_filter(
        &mut self,
        filter_string: Option<&str>,
        default_filter: &Coords,
    ) -> Result<Coords, Error<A::Error>> {
        let mut filter = match filter_string {
            Some(s) if !s.trim().is_empty() => {
                let result = parser::parse(s, AcceptedCommands::FILTER, DefaultValue::Wildcard)
                    .map_err(|e| Error::InvalidFilter {
                        input: s.to_string(),
                        source: e,
                    })?;
                let mut f = Coords::wildcard();
                result.apply(&mut f);
                f
            }
            _ => *default_filter,
        };

        let focus = self.focus_get_current();
        filter.evaluate_current(focus.as_ref(), false);
        debug_assert!(filter.check_fully_defined(false, false, true).is_ok());

        Ok(filter)
    }

    /// `info cuda <view> [filter]`.
    pub fn info_cuda(&mut self, arg: &str, out: &mut dyn InfoSink) -> Result<(), Error<A::Error>> {
        let arg = arg.trim_start();
        if arg.is_empty() {
            return Err(Error::MissingArgument);
        }

        let views: [(&str, fn(&mut Self, Option<&str>, &mut dyn InfoSink) -> Result<(), Error<A::Error>>); 7] = [
            ("devices", Self::info_devices),
            ("sms", Self::info_sms),
            ("warps", Self::info_warps),
            ("lanes", Self::info_lanes),
            ("kernels", Self::info_kernels),
            ("blocks", Self::info_blocks),
            ("threads", Self::info_threads),
        ];

        for (name, view) in views {
            if let Some(rest) = arg.strip_prefix(name) {
                let filter = match rest.trim() {
                    "" => None,
                    f => Some(f),
                };
                return self.run_info_command(|core, out| view(core, filter, out), out);
            }
        }

        Err(Error::UnrecognizedOption(arg.to_string()))
    }

    /// Run an info view under save/restore of the focus and the current
    /// context, so a view that wanders (to read PCs of other kernels, say)
    /// leaves the user's focus untouched.
    fn run_info_command(
        &mut self,
        command: impl FnOnce(&mut Self, &mut dyn InfoSink) -> Result<(), Error<A::Error>>,
        out: &mut dyn InfoSink,
    ) -> Result<(), Error<A::Error>> {
        self.save_current_context();
        self.focus_save();

        let result = command(self, out);

        self.restore_current_context();
        self.focus_restore();

        result
    }

    /// The `cuda …` prefix command: a query when only bare selectors were
    /// given, a focus switch otherwise.
    pub fn cuda_command(&mut self, arg: &str, out: &mut dyn InfoSink) -> Result<(), Error<A::Error>> {
        if arg.trim().is_empty() {
            return Err(Error::MissingArgument);
        }

        let result = parser::parse(
            arg,
            AcceptedCommands::SWITCH | AcceptedCommands::QUERY,
            DefaultValue::Wildcard,
        )
        .map_err(|e| Error::InvalidFilter {
            input: arg.to_string(),
            source: e,
        })?;

        match result.command {
            CommandKind::Query => self.command_query(arg, out),
            CommandKind::Switch => self.command_switch(arg, out),
            CommandKind::Filter => unreachable!("filters are not accepted here"),
        }
    }

    /// Switch the focus to the requested coordinates, resolved against the
    /// valid points on the hardware.
    pub fn command_switch(
        &mut self,
        switch_string: &str,
        out: &mut dyn InfoSink,
    ) -> Result<(), Error<A::Error>> {
        let current = self.focus_get_current();

        // read the user request; unspecified selector values default to
        // the current focus when there is one
        let default_value = if self.focus_is_device() {
            DefaultValue::Current
        } else {
            DefaultValue::Wildcard
        };
        let command = parser::parse(switch_string, AcceptedCommands::SWITCH, default_value)
            .map_err(|e| Error::InvalidFilter {
                input: switch_string.to_string(),
                source: e,
            })?;

        // the request alone, with unspecified fields left open
        let mut requested = Coords::invalid();
        command.apply(&mut requested);

        // the request overlaid on the current coordinates (wildcards when
        // there is no focus yet)
        let mut processed = match current {
            Some(c) if c.valid => c,
            _ => Coords::wildcard(),
        };
        command.apply(&mut processed);
        processed.evaluate_current(current.as_ref(), true);
        debug_assert!(processed.check_fully_defined(false, false, true).is_ok());

        // physical coordinates take priority over logical ones
        let candidates = self.find_valid(&processed)?;
        let solution = if command.any_physical() {
            candidates.closest_physical
        } else {
            candidates.closest_logical
        };

        let solution = match solution {
            Some(s) if requested.satisfied_by(&s) => s,
            _ => return Err(Error::UnsatisfiableFocus),
        };

        if let Some(current) = current {
            if current.valid && current == solution {
                out.text("CUDA focus unchanged.");
                return Ok(());
            }
        }

        self.focus_set_current(solution);
        self.host.update_convenience_variables(&solution);
        self.host.update_runtime_symbols();
        if let Some(kernel_id) = solution.kernel_id.exact() {
            self.kernel_load_elf_images(kernel_id);
        }
        self.host.switch_to_cuda_thread(&solution);

        out.text(&format!(
            "[Switching focus to CUDA {}]",
            solution.to_fancy_string()
        ));
        self.host.print_stack_frame();

        Ok(())
    }

    /// Print the requested coordinates of the current focus without
    /// changing it.
    pub fn command_query(
        &mut self,
        query_string: &str,
        out: &mut dyn InfoSink,
    ) -> Result<(), Error<A::Error>> {
        // bail out if the focus is not on a device
        if !self.focus_is_device() {
            return Err(Error::NoCurrentDevice);
        }

        let command = parser::parse(query_string, AcceptedCommands::QUERY, DefaultValue::Current)
            .map_err(|e| Error::InvalidFilter {
                input: query_string.to_string(),
                source: e,
            })?;

        let mut wished = Coords::invalid();
        command.apply(&mut wished);
        let current = self.focus_get_current();
        wished.evaluate_current(current.as_ref(), false);
        debug_assert!(wished.check_fully_defined(true, false, false).is_ok());

        out.text(&wished.to_fancy_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::common::CuDim3;
    use crate::coords::Coord;
    use crate::error::Error;
    use crate::testutil::{core_with_topology, RecordingSink, Topology};

    fn focused_topology() -> Topology {
        let mut topo = Topology::small();
        topo.valid_warps.insert((0, 0), 0b11);
        for wp in 0..2u32 {
            topo.valid_lanes.insert((0, 0, wp), 0b11);
            topo.active_lanes.insert((0, 0, wp), 0b11);
            topo.grid_ids.insert((0, 0, wp), 7);
            topo.block_idxs.insert((0, 0, wp), CuDim3::new(wp, 0, 0));
            for ln in 0..2 {
                topo.thread_idxs
                    .insert((0, 0, wp, ln), CuDim3::new(ln, 0, 0));
            }
        }
        topo
    }

    #[test]
    fn switch_moves_the_focus_to_the_requested_warp() {
        let mut core = core_with_topology(focused_topology());
        let mut out = RecordingSink::default();

        core.cuda_command("device 0 sm 0 warp 1 lane 0", &mut out)
            .unwrap();

        let focus = core.focus_get_current().unwrap();
        assert_eq!(focus.wp, Coord::Exact(1));
        assert_eq!(focus.ln, Coord::Exact(0));
        assert!(out.texts().iter().any(|t| t.starts_with("[Switching focus to CUDA")));
    }

    #[test]
    fn unsatisfiable_switch_leaves_the_focus_alone() {
        let mut core = core_with_topology(focused_topology());
        let mut out = RecordingSink::default();

        core.cuda_command("warp 1", &mut out).unwrap();
        let before = core.focus_get_current();

        let err = core.cuda_command("warp 6", &mut out).unwrap_err();
        assert!(matches!(err, Error::UnsatisfiableFocus));
        assert_eq!(core.focus_get_current(), before);
    }

    #[test]
    fn switching_to_the_current_focus_reports_unchanged() {
        let mut core = core_with_topology(focused_topology());
        let mut out = RecordingSink::default();

        core.cuda_command("device 0 sm 0 warp 0 lane 0", &mut out)
            .unwrap();
        core.cuda_command("device 0 sm 0 warp 0 lane 0", &mut out)
            .unwrap();

        assert!(out.texts().contains(&"CUDA focus unchanged.".to_string()));
    }

    #[test]
    fn query_without_a_device_focus_is_rejected() {
        let mut core = core_with_topology(focused_topology());
        let mut out = RecordingSink::default();

        let err = core.cuda_command("device", &mut out).unwrap_err();
        assert!(matches!(err, Error::NoCurrentDevice));
    }

    #[test]
    fn query_prints_the_requested_part_of_the_focus() {
        let mut core = core_with_topology(focused_topology());
        let mut out = RecordingSink::default();

        core.cuda_command("sm 0 warp 1", &mut out).unwrap();
        out.clear();

        core.cuda_command("warp", &mut out).unwrap();
        assert_eq!(out.texts(), vec!["warp 1".to_string()]);
    }

    #[test]
    fn info_cuda_requires_a_known_view() {
        let mut core = core_with_topology(focused_topology());
        let mut out = RecordingSink::default();

        assert!(matches!(
            core.info_cuda("", &mut out),
            Err(Error::MissingArgument)
        ));
        assert!(matches!(
            core.info_cuda("bogus", &mut out),
            Err(Error::UnrecognizedOption(_))
        ));
    }

    #[test]
    fn bad_filter_is_reported_not_fatal() {
        let mut core = core_with_topology(focused_topology());
        let mut out = RecordingSink::default();

        let err = core.info_cuda("warps fish 3", &mut out).unwrap_err();
        assert!(matches!(err, Error::InvalidFilter { .. }));
    }
}
