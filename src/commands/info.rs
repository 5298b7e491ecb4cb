//! The `info cuda …` tabular views.
//!
//! Each view compiles an array of row records by iterating the mirror,
//! computes per-column widths, and emits through the host's table sink.
//! The blocks and threads views optionally coalesce runs of logically
//! contiguous rows with identical displayed attributes into
//! `from … to …, count N` rows.

use crate::api::DebugApi;
use crate::common::CuDim3;
use crate::coords::{Coord, Coords};
use crate::error::Error;
use crate::host::{Align, HostDebugger, InfoSink};
use crate::iterator::{IteratorKind, Select};
use crate::session::CudaCore;

fn dim3_string(dim: Option<CuDim3>) -> String {
    match dim {
        Some(d) => d.to_string(),
        None => "n/a".to_string(),
    }
}

impl<A: DebugApi, H: HostDebugger> CudaCore<A, H> {
    /// Bitmask of SMs on which the kernel currently has a valid warp.
    pub fn kernel_compute_sms_mask(&mut self, kernel_id: u64) -> Result<u64, Error<A::Error>> {
        let (dev, grid_id) = {
            let kernel = self
                .kernels
                .find_by_id(kernel_id)
                .expect("sms mask of an unregistered kernel");
            (kernel.dev_id(), kernel.grid_id())
        };

        let mut filter = Coords::wildcard();
        filter.dev = Coord::Exact(dev);
        filter.grid_id = Coord::Exact(grid_id);

        let mut mask = 0u64;
        for c in self.iterate(IteratorKind::Warps, &filter, Select::VALID)? {
            mask |= 1u64 << c.sm.exact().unwrap();
        }
        Ok(mask)
    }

    pub(crate) fn info_devices(
        &mut self,
        filter_string: Option<&str>,
        out: &mut dyn InfoSink,
    ) -> Result<(), Error<A::Error>> {
        struct Row {
            current: bool,
            device: u32,
            description: String,
            sm_type: String,
            num_sms: u32,
            num_warps: u32,
            num_lanes: u32,
            num_regs: u32,
            active_sms_mask: u64,
        }

        let filter = self.build_filter(filter_string, &Coords::wildcard())?;

        let mut rows: Vec<Row> = Vec::new();
        let devices: Vec<Coords> = self
            .iterate(IteratorKind::Devices, &filter, Select::ALL)?
            .collect();
        for c in devices {
            let dev = c.dev.exact().unwrap();
            rows.push(Row {
                current: self.coords_is_current(&c),
                device: dev,
                description: self.device_get_device_type(dev)?,
                sm_type: self.device_get_sm_type(dev)?,
                num_sms: self.device_get_num_sms(dev)?,
                num_warps: self.device_get_num_warps(dev)?,
                num_lanes: self.device_get_num_lanes(dev)?,
                num_regs: self.device_get_num_registers(dev)?,
                active_sms_mask: self.device_get_active_sms_mask(dev)?,
            });
        }

        if rows.is_empty() {
            out.message("No CUDA devices.");
            return Ok(());
        }

        let mut w_description = "Description".len();
        let mut w_sm_type = "SM Type".len();
        for row in &rows {
            w_description = w_description.max(row.description.len());
            w_sm_type = w_sm_type.max(row.sm_type.len());
        }

        out.table_begin("InfoCudaDevicesTable", 9, rows.len());
        out.table_header(1, Align::Right, "current", " ");
        out.table_header(3, Align::Right, "device", "Dev");
        out.table_header(w_description, Align::Right, "description", "Description");
        out.table_header(w_sm_type, Align::Right, "sm_type", "SM Type");
        out.table_header(3, Align::Right, "num_sms", "SMs");
        out.table_header(8, Align::Right, "num_warps", "Warps/SM");
        out.table_header(10, Align::Right, "num_lanes", "Lanes/Warp");
        out.table_header(13, Align::Right, "num_regs", "Max Regs/Lane");
        out.table_header(18, Align::Right, "active_sms_mask", "Active SMs Mask");
        out.table_body();

        for row in &rows {
            out.row_begin("InfoCudaDevicesRow");
            out.field_string("current", if row.current { "*" } else { " " });
            out.field_int("device", row.device as u64);
            out.field_string("description", &row.description);
            out.field_string("sm_type", &row.sm_type);
            out.field_int("num_sms", row.num_sms as u64);
            out.field_int("num_warps", row.num_warps as u64);
            out.field_int("num_lanes", row.num_lanes as u64);
            out.field_int("num_regs", row.num_regs as u64);
            out.field_fmt("active_sms_mask", format_args!("0x{:016x}", row.active_sms_mask));
            out.text("\n");
            out.row_end();
        }

        out.table_end();
        Ok(())
    }

    pub(crate) fn info_sms(
        &mut self,
        filter_string: Option<&str>,
        out: &mut dyn InfoSink,
    ) -> Result<(), Error<A::Error>> {
        struct Row {
            current: bool,
            device: u32,
            sm: u32,
            active_warps_mask: u64,
        }

        let mut default_filter = Coords::wildcard();
        default_filter.dev = Coord::Current;
        let filter = self.build_filter(filter_string, &default_filter)?;

        let mut rows: Vec<Row> = Vec::new();
        let sms: Vec<Coords> = self.iterate(IteratorKind::Sms, &filter, Select::ALL)?.collect();
        for c in sms {
            let (dev, sm) = (c.dev.exact().unwrap(), c.sm.exact().unwrap());
            rows.push(Row {
                current: self.coords_is_current(&c),
                device: dev,
                sm,
                active_warps_mask: self.sm_get_valid_warps_mask(dev, sm)?,
            });
        }

        if rows.is_empty() {
            out.message("No CUDA SMs.");
            return Ok(());
        }

        out.table_begin("InfoCudaSmsTable", 3, rows.len());
        out.table_header(1, Align::Right, "current", " ");
        out.table_header(2, Align::Right, "sm", "SM");
        out.table_header(18, Align::Right, "active_warps_mask", "Active Warps Mask");
        out.table_body();

        let mut current_device = None;
        for row in &rows {
            if current_device != Some(row.device) {
                out.message(&format!("Device {}", row.device));
                current_device = Some(row.device);
            }

            out.row_begin("InfoCudaSmsRow");
            out.field_string("current", if row.current { "*" } else { " " });
            out.field_int("sm", row.sm as u64);
            out.field_fmt(
                "active_warps_mask",
                format_args!("0x{:016x}", row.active_warps_mask),
            );
            out.text("\n");
            out.row_end();
        }

        out.table_end();
        Ok(())
    }

    pub(crate) fn info_warps(
        &mut self,
        filter_string: Option<&str>,
        out: &mut dyn InfoSink,
    ) -> Result<(), Error<A::Error>> {
        struct Row {
            current: bool,
            device: u32,
            sm: u32,
            wp: u32,
            active_lanes_mask: String,
            divergent_lanes_mask: String,
            active_physical_pc: String,
            kernel_id: String,
            block_idx: String,
        }

        let mut default_filter = Coords::wildcard();
        default_filter.dev = Coord::Current;
        default_filter.sm = Coord::Current;
        let filter = self.build_filter(filter_string, &default_filter)?;

        let mut rows: Vec<Row> = Vec::new();
        let warps: Vec<Coords> = self
            .iterate(IteratorKind::Warps, &filter, Select::ALL)?
            .collect();
        for c in warps {
            let (dev, sm, wp) = (
                c.dev.exact().unwrap(),
                c.sm.exact().unwrap(),
                c.wp.exact().unwrap(),
            );

            let row = if self.warp_is_valid(dev, sm, wp)? {
                Row {
                    current: self.coords_is_current(&c),
                    device: dev,
                    sm,
                    wp,
                    active_lanes_mask: format!(
                        "0x{:08x}",
                        self.warp_get_active_lanes_mask(dev, sm, wp)?
                    ),
                    divergent_lanes_mask: format!(
                        "0x{:08x}",
                        self.warp_get_divergent_lanes_mask(dev, sm, wp)?
                    ),
                    active_physical_pc: format!("0x{:016x}", self.warp_get_active_pc(dev, sm, wp)?),
                    kernel_id: match self.warp_get_kernel(dev, sm, wp)? {
                        Some(id) => id.to_string(),
                        None => "n/a".to_string(),
                    },
                    block_idx: dim3_string(Some(self.warp_get_block_idx(dev, sm, wp)?)),
                }
            } else {
                Row {
                    current: self.coords_is_current(&c),
                    device: dev,
                    sm,
                    wp,
                    active_lanes_mask: "0x00000000".to_string(),
                    divergent_lanes_mask: "0x00000000".to_string(),
                    active_physical_pc: "n/a".to_string(),
                    kernel_id: "n/a".to_string(),
                    block_idx: "n/a".to_string(),
                }
            };
            rows.push(row);
        }

        if rows.is_empty() {
            out.message("No CUDA Warps.");
            return Ok(());
        }

        let mut w_block_idx = "BlockIdx".len();
        for row in &rows {
            w_block_idx = w_block_idx.max(row.block_idx.len());
        }

        out.table_begin("InfoCudaWarpsTable", 7, rows.len());
        out.table_header(1, Align::Right, "current", " ");
        out.table_header(2, Align::Right, "warp", "Wp");
        out.table_header(17, Align::Right, "active_lanes_mask", "Active Lanes Mask");
        out.table_header(20, Align::Right, "divergent_lanes_mask", "Divergent Lanes Mask");
        out.table_header(18, Align::Right, "active_physical_pc", "Active Physical PC");
        out.table_header(6, Align::Right, "kernel", "Kernel");
        out.table_header(w_block_idx, Align::Right, "blockIdx", "BlockIdx");
        out.table_body();

        let mut group = None;
        for row in &rows {
            if group != Some((row.device, row.sm)) {
                out.message(&format!("Device {} SM {}", row.device, row.sm));
                group = Some((row.device, row.sm));
            }

            out.row_begin("InfoCudaWarpsRow");
            out.field_string("current", if row.current { "*" } else { " " });
            out.field_int("warp", row.wp as u64);
            out.field_string("active_lanes_mask", &row.active_lanes_mask);
            out.field_string("divergent_lanes_mask", &row.divergent_lanes_mask);
            out.field_string("active_physical_pc", &row.active_physical_pc);
            out.field_string("kernel", &row.kernel_id);
            out.field_string("blockIdx", &row.block_idx);
            out.text("\n");
            out.row_end();
        }

        out.table_end();
        Ok(())
    }

    pub(crate) fn info_lanes(
        &mut self,
        filter_string: Option<&str>,
        out: &mut dyn InfoSink,
    ) -> Result<(), Error<A::Error>> {
        struct Row {
            current: bool,
            device: u32,
            sm: u32,
            wp: u32,
            ln: u32,
            state: &'static str,
            physical_pc: String,
            thread_idx: String,
        }

        let mut default_filter = Coords::wildcard();
        default_filter.dev = Coord::Current;
        default_filter.sm = Coord::Current;
        default_filter.wp = Coord::Current;
        let filter = self.build_filter(filter_string, &default_filter)?;

        let mut rows: Vec<Row> = Vec::new();
        let lanes: Vec<Coords> = self
            .iterate(IteratorKind::Lanes, &filter, Select::ALL)?
            .collect();
        for c in lanes {
            let (dev, sm, wp, ln) = (
                c.dev.exact().unwrap(),
                c.sm.exact().unwrap(),
                c.wp.exact().unwrap(),
                c.ln.exact().unwrap(),
            );

            let valid =
                self.warp_is_valid(dev, sm, wp)? && self.lane_is_valid(dev, sm, wp, ln)?;
            let row = if valid {
                Row {
                    current: self.coords_is_current(&c),
                    device: dev,
                    sm,
                    wp,
                    ln,
                    state: if self.lane_is_active(dev, sm, wp, ln)? {
                        "active"
                    } else {
                        "divergent"
                    },
                    physical_pc: format!("0x{:016x}", self.lane_get_pc(dev, sm, wp, ln)?),
                    thread_idx: dim3_string(Some(self.lane_get_thread_idx(dev, sm, wp, ln)?)),
                }
            } else {
                Row {
                    current: self.coords_is_current(&c),
                    device: dev,
                    sm,
                    wp,
                    ln,
                    state: "inactive",
                    physical_pc: "n/a".to_string(),
                    thread_idx: "n/a".to_string(),
                }
            };
            rows.push(row);
        }

        if rows.is_empty() {
            out.message("No CUDA Lanes.");
            return Ok(());
        }

        out.table_begin("InfoCudaLanesTable", 5, rows.len());
        out.table_header(1, Align::Right, "current", " ");
        out.table_header(2, Align::Right, "lane", "Ln");
        out.table_header(9, Align::Right, "state", "State");
        out.table_header(18, Align::Right, "physical_pc", "Physical PC");
        out.table_header(9, Align::Right, "threadIdx", "ThreadIdx");
        out.table_body();

        let mut group = None;
        for row in &rows {
            if group != Some((row.device, row.sm, row.wp)) {
                out.message(&format!(
                    "Device {} SM {} Warp {}",
                    row.device, row.sm, row.wp
                ));
                group = Some((row.device, row.sm, row.wp));
            }

            out.row_begin("InfoCudaLanesRow");
            out.field_string("current", if row.current { "*" } else { " " });
            out.field_int("lane", row.ln as u64);
            out.field_string("state", row.state);
            out.field_string("physical_pc", &row.physical_pc);
            out.field_string("threadIdx", &row.thread_idx);
            out.text("\n");
            out.row_end();
        }

        out.table_end();
        Ok(())
    }

    pub(crate) fn info_kernels(
        &mut self,
        filter_string: Option<&str>,
        out: &mut dyn InfoSink,
    ) -> Result<(), Error<A::Error>> {
        struct Row {
            current: bool,
            kernel_id: u64,
            device: u32,
            grid_id: u64,
            sms_mask: u64,
            grid_dim: String,
            block_dim: String,
            name: String,
        }

        let filter = self.build_filter(filter_string, &Coords::wildcard())?;

        let mut rows: Vec<Row> = Vec::new();
        let kernels: Vec<Coords> = self
            .iterate(IteratorKind::Kernels, &filter, Select::VALID)?
            .collect();
        for c in kernels {
            let kernel_id = c
                .kernel_id
                .exact()
                .expect("a valid warp belongs to an unregistered kernel");
            let (name, grid_dim, block_dim) = {
                let kernel = self.kernels.find_by_id(kernel_id).unwrap();
                (
                    kernel.name().to_string(),
                    kernel.grid_dim().to_string(),
                    kernel.block_dim().to_string(),
                )
            };
            rows.push(Row {
                current: self.coords_is_current(&c),
                kernel_id,
                device: c.dev.exact().unwrap(),
                grid_id: c.grid_id.exact().unwrap(),
                sms_mask: self.kernel_compute_sms_mask(kernel_id)?,
                grid_dim,
                block_dim,
                name,
            });
        }

        if rows.is_empty() {
            out.message("No CUDA kernels.");
            return Ok(());
        }

        let mut w_name = "Name".len();
        let mut w_grid_dim = "GridDim".len();
        let mut w_block_dim = "BlockDim".len();
        for row in &rows {
            w_name = w_name.max(row.name.len());
            w_grid_dim = w_grid_dim.max(row.grid_dim.len());
            w_block_dim = w_block_dim.max(row.block_dim.len());
        }

        out.table_begin("InfoCudaKernelsTable", 8, rows.len());
        out.table_header(1, Align::Right, "current", " ");
        out.table_header(6, Align::Right, "kernel", "Kernel");
        out.table_header(3, Align::Right, "device", "Dev");
        out.table_header(4, Align::Right, "grid", "Grid");
        out.table_header(10, Align::Right, "sms_mask", "SMs Mask");
        out.table_header(w_grid_dim, Align::Right, "gridDim", "GridDim");
        out.table_header(w_block_dim, Align::Right, "blockDim", "BlockDim");
        out.table_header(w_name, Align::Left, "name", "Name");
        out.table_body();

        for row in &rows {
            out.row_begin("InfoCudaKernelsRow");
            out.field_string("current", if row.current { "*" } else { " " });
            out.field_int("kernel", row.kernel_id);
            out.field_int("device", row.device as u64);
            out.field_int("grid", row.grid_id);
            out.field_fmt("sms_mask", format_args!("0x{:08x}", row.sms_mask));
            out.field_string("gridDim", &row.grid_dim);
            out.field_string("blockDim", &row.block_dim);
            out.field_string("name", &row.name);
            out.text("\n");
            out.row_end();
        }

        out.table_end();
        Ok(())
    }

    pub(crate) fn info_blocks(
        &mut self,
        filter_string: Option<&str>,
        out: &mut dyn InfoSink,
    ) -> Result<(), Error<A::Error>> {
        struct Row {
            current: bool,
            kernel_id: u64,
            from: CuDim3,
            to: CuDim3,
            count: u32,
            device: u32,
            sm: u32,
        }

        let mut default_filter = Coords::wildcard();
        default_filter.kernel_id = Coord::Current;
        let filter = self.build_filter(filter_string, &default_filter)?;

        let coalescing = self.options.coalescing;
        let points: Vec<Coords> = self
            .iterate(IteratorKind::Blocks, &filter, Select::VALID)?
            .collect();

        let mut rows: Vec<Row> = Vec::new();
        let mut expected: Option<Coords> = None;
        for c in &points {
            let kernel_id = c
                .kernel_id
                .exact()
                .expect("a valid block belongs to an unregistered kernel");
            let grid_dim = self.kernels.find_by_id(kernel_id).unwrap().grid_dim();
            let block_idx = c.block_idx.as_dim3().unwrap();

            let contiguous = match &expected {
                Some(e) => Coords::compare_logical(e, c).is_eq(),
                None => false,
            };

            if rows.is_empty() || !contiguous || !coalescing {
                rows.push(Row {
                    current: false,
                    kernel_id,
                    from: block_idx,
                    to: block_idx,
                    count: 0,
                    device: c.dev.exact().unwrap(),
                    sm: c.sm.exact().unwrap(),
                });
            }

            let current = self.coords_is_current(c);
            let row = rows.last_mut().unwrap();
            row.current |= current;
            row.count += 1;
            row.to = block_idx;

            let mut e = Coords::wildcard();
            e.kernel_id = c.kernel_id;
            e.block_idx = c.block_idx;
            e.increment_block(grid_dim);
            expected = Some(e);
        }

        if rows.is_empty() {
            out.message("No CUDA blocks.");
            return Ok(());
        }

        if coalescing {
            out.table_begin("CoalescedInfoCudaBlocksTable", 5, rows.len());
            out.table_header(1, Align::Right, "current", " ");
            out.table_header(9, Align::Right, "from", "BlockIdx");
            out.table_header(11, Align::Right, "to", "To BlockIdx");
            out.table_header(5, Align::Right, "count", "Count");
            out.table_header(7, Align::Right, "state", "State");
        } else {
            out.table_begin("UncoalescedInfoCudaBlocksTable", 5, rows.len());
            out.table_header(1, Align::Right, "current", " ");
            out.table_header(9, Align::Right, "blockIdx", "BlockIdx");
            out.table_header(7, Align::Right, "state", "State");
            out.table_header(3, Align::Right, "device", "Dev");
            out.table_header(2, Align::Right, "sm", "SM");
        }
        out.table_body();

        let mut group = None;
        for row in &rows {
            if group != Some(row.kernel_id) {
                out.message(&format!("Kernel {}", row.kernel_id));
                group = Some(row.kernel_id);
            }

            if coalescing {
                out.row_begin("CoalescedInfoCudaBlocksRow");
                out.field_string("current", if row.current { "*" } else { " " });
                out.field_string("from", &row.from.to_string());
                out.field_string("to", &row.to.to_string());
                out.field_int("count", row.count as u64);
                out.field_string("state", "running");
            } else {
                out.row_begin("UncoalescedInfoCudaBlocksRow");
                out.field_string("current", if row.current { "*" } else { " " });
                out.field_string("blockIdx", &row.from.to_string());
                out.field_string("state", "running");
                out.field_int("device", row.device as u64);
                out.field_int("sm", row.sm as u64);
            }
            out.text("\n");
            out.row_end();
        }

        out.table_end();
        Ok(())
    }

    pub(crate) fn info_threads(
        &mut self,
        filter_string: Option<&str>,
        out: &mut dyn InfoSink,
    ) -> Result<(), Error<A::Error>> {
        struct Row {
            current: bool,
            kernel_id: u64,
            pc: u64,
            filename: String,
            line: u32,
            from_block: CuDim3,
            from_thread: CuDim3,
            to_block: CuDim3,
            to_thread: CuDim3,
            count: u32,
            device: u32,
            sm: u32,
            wp: u32,
            ln: u32,
        }

        let mut default_filter = Coords::wildcard();
        default_filter.kernel_id = Coord::Current;
        let filter = self.build_filter(filter_string, &default_filter)?;

        let coalescing = self.options.coalescing;
        let points: Vec<Coords> = self
            .iterate(IteratorKind::Threads, &filter, Select::VALID)?
            .collect();

        let mut rows: Vec<Row> = Vec::new();
        let mut expected: Option<Coords> = None;
        let mut prev_kernel: Option<u64> = None;
        let mut prev_pc: Option<u64> = None;
        let mut prev_line: Option<crate::host::SourceLine> = None;

        for c in &points {
            let (dev, sm, wp, ln) = (
                c.dev.exact().unwrap(),
                c.sm.exact().unwrap(),
                c.wp.exact().unwrap(),
                c.ln.exact().unwrap(),
            );
            let kernel_id = c
                .kernel_id
                .exact()
                .expect("a valid thread belongs to an unregistered kernel");
            let (grid_dim, block_dim) = {
                let kernel = self.kernels.find_by_id(kernel_id).unwrap();
                (kernel.grid_dim(), kernel.block_dim())
            };

            if prev_kernel != Some(kernel_id) {
                self.kernel_load_elf_images(kernel_id);
            }

            let pc = self.lane_get_virtual_pc(dev, sm, wp, ln)?;
            let line = if prev_pc == Some(pc) {
                prev_line.clone()
            } else {
                self.host.find_pc_line(pc)
            };

            let contiguous = prev_pc == Some(pc)
                && match &expected {
                    Some(e) => Coords::compare_logical(e, c).is_eq(),
                    None => false,
                };

            let block_idx = c.block_idx.as_dim3().unwrap();
            let thread_idx = c.thread_idx.as_dim3().unwrap();

            if rows.is_empty() || !contiguous || !coalescing {
                rows.push(Row {
                    current: false,
                    kernel_id,
                    pc,
                    filename: line
                        .as_ref()
                        .map(|l| l.filename.clone())
                        .unwrap_or_else(|| "n/a".to_string()),
                    line: line.as_ref().map(|l| l.line).unwrap_or(0),
                    from_block: block_idx,
                    from_thread: thread_idx,
                    to_block: block_idx,
                    to_thread: thread_idx,
                    count: 0,
                    device: dev,
                    sm,
                    wp,
                    ln,
                });
            }

            let current = self.coords_is_current(c);
            let row = rows.last_mut().unwrap();
            row.current |= current;
            row.count += 1;
            row.to_block = block_idx;
            row.to_thread = thread_idx;

            let mut e = Coords::wildcard();
            e.kernel_id = c.kernel_id;
            e.block_idx = c.block_idx;
            e.thread_idx = c.thread_idx;
            e.increment_thread(grid_dim, block_dim);
            expected = Some(e);
            prev_kernel = Some(kernel_id);
            prev_pc = Some(pc);
            prev_line = line;
        }

        if rows.is_empty() {
            out.message("No CUDA threads.");
            return Ok(());
        }

        let mut w_filename = "Filename".len();
        for row in &rows {
            w_filename = w_filename.max(row.filename.len());
        }

        if coalescing {
            out.table_begin("CoalescedInfoCudaThreadsTable", 9, rows.len());
            out.table_header(1, Align::Right, "current", " ");
            out.table_header(9, Align::Right, "from_blockIdx", "BlockIdx");
            out.table_header(9, Align::Right, "from_threadIdx", "ThreadIdx");
            out.table_header(11, Align::Right, "to_blockIdx", "To BlockIdx");
            out.table_header(9, Align::Right, "to_threadIdx", "ThreadIdx");
            out.table_header(5, Align::Right, "count", "Count");
            out.table_header(18, Align::Right, "virtual_pc", "Virtual PC");
            out.table_header(w_filename, Align::Right, "filename", "Filename");
            out.table_header(5, Align::Right, "line", "Line");
        } else {
            out.table_begin("UncoalescedInfoCudaThreadsTable", 10, rows.len());
            out.table_header(1, Align::Right, "current", " ");
            out.table_header(9, Align::Right, "blockIdx", "BlockIdx");
            out.table_header(9, Align::Right, "threadIdx", "ThreadIdx");
            out.table_header(18, Align::Right, "virtual_pc", "Virtual PC");
            out.table_header(3, Align::Right, "device", "Dev");
            out.table_header(2, Align::Right, "sm", "SM");
            out.table_header(2, Align::Right, "warp", "Wp");
            out.table_header(2, Align::Right, "lane", "Ln");
            out.table_header(w_filename, Align::Right, "filename", "Filename");
            out.table_header(5, Align::Right, "line", "Line");
        }
        out.table_body();

        let mut group = None;
        for row in &rows {
            if group != Some(row.kernel_id) {
                out.message(&format!("Kernel {}", row.kernel_id));
                group = Some(row.kernel_id);
            }

            if coalescing {
                out.row_begin("CoalescedInfoCudaThreadsRow");
                out.field_string("current", if row.current { "*" } else { " " });
                out.field_string("from_blockIdx", &row.from_block.to_string());
                out.field_string("from_threadIdx", &row.from_thread.to_string());
                out.field_string("to_blockIdx", &row.to_block.to_string());
                out.field_string("to_threadIdx", &row.to_thread.to_string());
                out.field_int("count", row.count as u64);
                out.field_fmt("virtual_pc", format_args!("0x{:016x}", row.pc));
                out.field_string("filename", &row.filename);
                out.field_int("line", row.line as u64);
            } else {
                out.row_begin("UncoalescedInfoCudaThreadsRow");
                out.field_string("current", if row.current { "*" } else { " " });
                out.field_string("blockIdx", &row.from_block.to_string());
                out.field_string("threadIdx", &row.from_thread.to_string());
                out.field_fmt("virtual_pc", format_args!("0x{:016x}", row.pc));
                out.field_int("device", row.device as u64);
                out.field_int("sm", row.sm as u64);
                out.field_int("warp", row.wp as u64);
                out.field_int("lane", row.ln as u64);
                out.field_string("filename", &row.filename);
                out.field_int("line", row.line as u64);
            }
            out.text("\n");
            out.row_end();
        }

        out.table_end();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::common::{CuDim3, ElfImage, KernelOrigin, KernelType};
    use crate::events::CudaEvent;
    use crate::testutil::{core_with_topology, RecordingSink, Topology};

    /// One kernel, grid (2,1,1) x block (4,1,1), fully resident: block 0
    /// on warp 0, block 1 on warp 1, four lanes each, all at one PC.
    fn resident_kernel_topology() -> Topology {
        let mut topo = Topology::small();
        topo.valid_warps.insert((0, 0), 0b11);
        for wp in 0..2u32 {
            topo.valid_lanes.insert((0, 0, wp), 0b1111);
            topo.active_lanes.insert((0, 0, wp), 0b1111);
            topo.grid_ids.insert((0, 0, wp), 7);
            topo.block_idxs.insert((0, 0, wp), CuDim3::new(wp, 0, 0));
            for ln in 0..4 {
                topo.thread_idxs
                    .insert((0, 0, wp, ln), CuDim3::new(ln, 0, 0));
                topo.virtual_pcs.insert((0, 0, wp, ln), 0x1000);
            }
        }
        topo.events = vec![
            CudaEvent::CtxCreate {
                dev: 0,
                context_id: 0xa,
                tid: 100,
            },
            CudaEvent::KernelReady {
                dev: 0,
                context_id: 0xa,
                module_id: 0x11,
                grid_id: 7,
                tid: 100,
                entry_pc: 0x1000,
                grid_dim: CuDim3::new(2, 1, 1),
                block_dim: CuDim3::new(4, 1, 1),
                kind: KernelType::Application,
                parent_grid_id: 0,
                origin: KernelOrigin::Cpu,
            },
            CudaEvent::ElfImageLoaded {
                dev: 0,
                context_id: 0xa,
                module_id: 0x11,
                elf_image: ElfImage {
                    image: 0x1000,
                    size: 0x1000,
                },
            },
        ];
        topo
    }

    fn drain(core: &mut crate::testutil::TestCore) {
        use crate::api::EventQueueKind;
        // KernelReady is queued before ElfImageLoaded in the topology, but
        // the context must exist first; order within the vec is preserved
        core.process_events(EventQueueKind::Sync).unwrap();
    }

    #[test]
    fn coalesced_threads_collapse_into_one_range() {
        let mut core = core_with_topology(resident_kernel_topology());
        drain(&mut core);
        core.options_mut().coalescing = true;

        let mut out = RecordingSink::default();
        core.info_cuda("threads", &mut out).unwrap();

        let rows = out.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["from_blockIdx"], "(0,0,0)");
        assert_eq!(rows[0]["from_threadIdx"], "(0,0,0)");
        assert_eq!(rows[0]["to_blockIdx"], "(1,0,0)");
        assert_eq!(rows[0]["to_threadIdx"], "(3,0,0)");
        assert_eq!(rows[0]["count"], "8");
    }

    #[test]
    fn coalescing_preserves_the_thread_multiset() {
        // gather the per-thread rows with coalescing off
        let mut core = core_with_topology(resident_kernel_topology());
        drain(&mut core);
        core.options_mut().coalescing = false;

        let mut out = RecordingSink::default();
        core.info_cuda("threads", &mut out).unwrap();
        let mut uncoalesced: Vec<(String, String)> = out
            .rows()
            .iter()
            .map(|r| (r["blockIdx"].clone(), r["threadIdx"].clone()))
            .collect();
        uncoalesced.sort();
        assert_eq!(uncoalesced.len(), 8);

        // expand the coalesced ranges back into individual threads
        let mut core = core_with_topology(resident_kernel_topology());
        drain(&mut core);
        core.options_mut().coalescing = true;

        let mut out = RecordingSink::default();
        core.info_cuda("threads", &mut out).unwrap();

        let grid_dim = CuDim3::new(2, 1, 1);
        let block_dim = CuDim3::new(4, 1, 1);
        let mut expanded: Vec<(String, String)> = Vec::new();
        for row in out.rows() {
            let count: u32 = row["count"].parse().unwrap();
            let mut c = crate::coords::Coords::wildcard();
            c.block_idx = parse_dim3(&row["from_blockIdx"]);
            c.thread_idx = parse_dim3(&row["from_threadIdx"]);
            for _ in 0..count {
                expanded.push((
                    c.block_idx.as_dim3().unwrap().to_string(),
                    c.thread_idx.as_dim3().unwrap().to_string(),
                ));
                c.increment_thread(grid_dim, block_dim);
            }
        }
        expanded.sort();

        assert_eq!(expanded, uncoalesced);
    }

    fn parse_dim3(s: &str) -> crate::coords::CoordDim3 {
        let inner = s.trim_start_matches('(').trim_end_matches(')');
        let parts: Vec<u32> = inner.split(',').map(|p| p.parse().unwrap()).collect();
        crate::coords::CoordDim3::exact(CuDim3::new(parts[0], parts[1], parts[2]))
    }

    #[test]
    fn pc_change_breaks_a_coalesced_range() {
        let mut topo = resident_kernel_topology();
        // warp 1 sits at a different PC
        for ln in 0..4 {
            topo.virtual_pcs.insert((0, 0, 1, ln), 0x2000);
        }
        let mut core = core_with_topology(topo);
        drain(&mut core);
        core.options_mut().coalescing = true;

        let mut out = RecordingSink::default();
        core.info_cuda("threads", &mut out).unwrap();

        let rows = out.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["count"], "4");
        assert_eq!(rows[1]["count"], "4");
    }

    #[test]
    fn devices_view_reports_the_descriptors() {
        let mut core = core_with_topology(resident_kernel_topology());
        drain(&mut core);

        let mut out = RecordingSink::default();
        core.info_cuda("devices", &mut out).unwrap();

        let rows = out.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["device"], "0");
        assert_eq!(rows[0]["num_lanes"], "32");
        assert_eq!(rows[0]["active_sms_mask"], "0x0000000000000001");
    }

    #[test]
    fn kernels_view_shows_the_resident_kernel() {
        let mut core = core_with_topology(resident_kernel_topology());
        drain(&mut core);

        let mut out = RecordingSink::default();
        core.info_cuda("kernels", &mut out).unwrap();

        let rows = out.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["grid"], "7");
        assert_eq!(rows[0]["sms_mask"], "0x00000001");
        assert_eq!(rows[0]["gridDim"], "(2,1,1)");
        assert_eq!(rows[0]["blockDim"], "(4,1,1)");
    }

    #[test]
    fn blocks_view_coalesces_contiguous_blocks() {
        let mut core = core_with_topology(resident_kernel_topology());
        drain(&mut core);
        core.options_mut().coalescing = true;

        let mut out = RecordingSink::default();
        core.info_cuda("blocks", &mut out).unwrap();

        let rows = out.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["from"], "(0,0,0)");
        assert_eq!(rows[0]["to"], "(1,0,0)");
        assert_eq!(rows[0]["count"], "2");
    }

    #[test]
    fn info_views_leave_focus_and_context_untouched() {
        let mut core = core_with_topology(resident_kernel_topology());
        drain(&mut core);
        core.set_current_context(None);

        let mut out = RecordingSink::default();
        core.info_cuda("threads", &mut out).unwrap();

        // the view wandered through kernel ELF images, but the wrapper
        // restored the UI state
        assert_eq!(core.host().loaded_modules(), vec![0x11]);
        assert_eq!(core.current_context(), None);
        assert_eq!(core.focus_get_current(), None);
    }

    #[test]
    fn sms_view_groups_rows_by_device() {
        let mut core = core_with_topology(resident_kernel_topology());
        drain(&mut core);

        let mut out = RecordingSink::default();
        core.info_cuda("sms", &mut out).unwrap();

        assert_eq!(out.messages().to_vec(), vec!["Device 0".to_string()]);
        assert_eq!(out.rows().len(), 1);
        assert_eq!(out.rows()[0]["active_warps_mask"], "0x0000000000000003");
    }
}
