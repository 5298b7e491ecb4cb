//! Scripted fakes for the two ports, shared by the unit tests.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::api::{BatchTransport, DebugApi, EventQueueKind, GridInfo};
use crate::common::{
    AttachState, CuDim3, DevId, ElfImage, KernelOrigin, KernelType, LaneException, LnId, SmId,
    StorageSegment, WpId,
};
use crate::events::CudaEvent;
use crate::host::{Align, HostDebugger, InfoSink, SourceLine};
use crate::options::DebugOptions;
use crate::session::CudaCore;

pub(crate) type TestCore = CudaCore<MockApi, MockHost>;

/// A scripted device topology backing a [`MockApi`].
#[derive(Debug, Clone)]
pub(crate) struct Topology {
    pub num_devices: u32,
    pub num_sms: u32,
    pub num_warps: u32,
    pub num_lanes: u32,
    pub num_registers: u32,
    pub dev_type: String,
    pub sm_type: String,
    pub valid_warps: HashMap<(DevId, SmId), u64>,
    pub broken_warps: HashMap<(DevId, SmId), u64>,
    pub valid_lanes: HashMap<(DevId, SmId, WpId), u32>,
    pub active_lanes: HashMap<(DevId, SmId, WpId), u32>,
    pub grid_ids: HashMap<(DevId, SmId, WpId), u64>,
    pub block_idxs: HashMap<(DevId, SmId, WpId), CuDim3>,
    pub thread_idxs: HashMap<(DevId, SmId, WpId, LnId), CuDim3>,
    pub pcs: HashMap<(DevId, SmId, WpId, LnId), u64>,
    pub virtual_pcs: HashMap<(DevId, SmId, WpId, LnId), u64>,
    pub exceptions: HashMap<(DevId, SmId, WpId, LnId), LaneException>,
    pub exception_sm_mask: u64,
    pub single_step_result: u64,
    pub grid_infos: HashMap<(DevId, u64), GridInfo>,
    pub events: Vec<CudaEvent>,
    pub with_context: bool,
}

impl Topology {
    /// One device, one SM, eight warps of 32 lanes, nothing valid.
    pub fn small() -> Topology {
        Topology {
            num_devices: 1,
            num_sms: 1,
            num_warps: 8,
            num_lanes: 32,
            num_registers: 63,
            dev_type: "GF100".to_string(),
            sm_type: "sm_20".to_string(),
            valid_warps: HashMap::new(),
            broken_warps: HashMap::new(),
            valid_lanes: HashMap::new(),
            active_lanes: HashMap::new(),
            grid_ids: HashMap::new(),
            block_idxs: HashMap::new(),
            thread_idxs: HashMap::new(),
            pcs: HashMap::new(),
            virtual_pcs: HashMap::new(),
            exceptions: HashMap::new(),
            exception_sm_mask: !0,
            single_step_result: 0,
            grid_infos: HashMap::new(),
            events: Vec::new(),
            with_context: false,
        }
    }
}

/// A [`DebugApi`] answering from a [`Topology`], counting every call.
#[derive(Debug)]
pub(crate) struct MockApi {
    topo: Topology,
    events: VecDeque<CudaEvent>,
    attach_state: AttachState,
    calls: HashMap<&'static str, usize>,
}

impl MockApi {
    fn new(topo: Topology) -> MockApi {
        let events = topo.events.iter().cloned().collect();
        MockApi {
            topo,
            events,
            attach_state: AttachState::NotStarted,
            calls: HashMap::new(),
        }
    }

    fn count(&mut self, name: &'static str) {
        *self.calls.entry(name).or_insert(0) += 1;
    }

    pub fn calls(&self, name: &str) -> usize {
        self.calls.get(name).copied().unwrap_or(0)
    }
}

impl DebugApi for MockApi {
    type Error = String;

    fn get_num_devices(&mut self) -> Result<u32, String> {
        self.count("get_num_devices");
        Ok(self.topo.num_devices)
    }

    fn get_num_sms(&mut self, _dev: DevId) -> Result<u32, String> {
        self.count("get_num_sms");
        Ok(self.topo.num_sms)
    }

    fn get_num_warps(&mut self, _dev: DevId) -> Result<u32, String> {
        self.count("get_num_warps");
        Ok(self.topo.num_warps)
    }

    fn get_num_lanes(&mut self, _dev: DevId) -> Result<u32, String> {
        self.count("get_num_lanes");
        Ok(self.topo.num_lanes)
    }

    fn get_num_registers(&mut self, _dev: DevId) -> Result<u32, String> {
        self.count("get_num_registers");
        Ok(self.topo.num_registers)
    }

    fn get_device_type(&mut self, _dev: DevId) -> Result<String, String> {
        self.count("get_device_type");
        Ok(self.topo.dev_type.clone())
    }

    fn get_sm_type(&mut self, _dev: DevId) -> Result<String, String> {
        self.count("get_sm_type");
        Ok(self.topo.sm_type.clone())
    }

    fn read_valid_warps(&mut self, dev: DevId, sm: SmId) -> Result<u64, String> {
        self.count("read_valid_warps");
        Ok(self.topo.valid_warps.get(&(dev, sm)).copied().unwrap_or(0))
    }

    fn read_broken_warps(&mut self, dev: DevId, sm: SmId) -> Result<u64, String> {
        self.count("read_broken_warps");
        Ok(self.topo.broken_warps.get(&(dev, sm)).copied().unwrap_or(0))
    }

    fn read_valid_lanes(&mut self, dev: DevId, sm: SmId, wp: WpId) -> Result<u32, String> {
        self.count("read_valid_lanes");
        Ok(self
            .topo
            .valid_lanes
            .get(&(dev, sm, wp))
            .copied()
            .unwrap_or(0))
    }

    fn read_active_lanes(&mut self, dev: DevId, sm: SmId, wp: WpId) -> Result<u32, String> {
        self.count("read_active_lanes");
        Ok(self
            .topo
            .active_lanes
            .get(&(dev, sm, wp))
            .copied()
            .unwrap_or(0))
    }

    fn read_grid_id(&mut self, dev: DevId, sm: SmId, wp: WpId) -> Result<u64, String> {
        self.count("read_grid_id");
        Ok(self.topo.grid_ids.get(&(dev, sm, wp)).copied().unwrap_or(0))
    }

    fn read_block_idx(&mut self, dev: DevId, sm: SmId, wp: WpId) -> Result<CuDim3, String> {
        self.count("read_block_idx");
        Ok(self
            .topo
            .block_idxs
            .get(&(dev, sm, wp))
            .copied()
            .unwrap_or_default())
    }

    fn read_thread_idx(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
        ln: LnId,
    ) -> Result<CuDim3, String> {
        self.count("read_thread_idx");
        Ok(self
            .topo
            .thread_idxs
            .get(&(dev, sm, wp, ln))
            .copied()
            .unwrap_or_default())
    }

    fn read_pc(&mut self, dev: DevId, sm: SmId, wp: WpId, ln: LnId) -> Result<u64, String> {
        self.count("read_pc");
        Ok(self.topo.pcs.get(&(dev, sm, wp, ln)).copied().unwrap_or(0))
    }

    fn read_virtual_pc(&mut self, dev: DevId, sm: SmId, wp: WpId, ln: LnId) -> Result<u64, String> {
        self.count("read_virtual_pc");
        Ok(self
            .topo
            .virtual_pcs
            .get(&(dev, sm, wp, ln))
            .copied()
            .unwrap_or(0))
    }

    fn read_lane_exception(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
        ln: LnId,
    ) -> Result<LaneException, String> {
        self.count("read_lane_exception");
        Ok(self
            .topo
            .exceptions
            .get(&(dev, sm, wp, ln))
            .copied()
            .unwrap_or_default())
    }

    fn read_register(
        &mut self,
        _dev: DevId,
        _sm: SmId,
        _wp: WpId,
        _ln: LnId,
        regno: u32,
    ) -> Result<u32, String> {
        self.count("read_register");
        Ok(regno)
    }

    fn read_call_depth(&mut self, _: DevId, _: SmId, _: WpId, _: LnId) -> Result<i32, String> {
        self.count("read_call_depth");
        Ok(0)
    }

    fn read_syscall_call_depth(
        &mut self,
        _: DevId,
        _: SmId,
        _: WpId,
        _: LnId,
    ) -> Result<i32, String> {
        self.count("read_syscall_call_depth");
        Ok(0)
    }

    fn read_virtual_return_address(
        &mut self,
        _: DevId,
        _: SmId,
        _: WpId,
        _: LnId,
        _level: i32,
    ) -> Result<u64, String> {
        self.count("read_virtual_return_address");
        Ok(0)
    }

    fn read_device_exception_state(&mut self, _dev: DevId) -> Result<u64, String> {
        self.count("read_device_exception_state");
        Ok(self.topo.exception_sm_mask)
    }

    fn memcheck_read_error_address(
        &mut self,
        _: DevId,
        _: SmId,
        _: WpId,
        _: LnId,
    ) -> Result<(u64, StorageSegment), String> {
        self.count("memcheck_read_error_address");
        Ok((0, StorageSegment::Unspecified))
    }

    fn single_step_warp(&mut self, _dev: DevId, _sm: SmId, _wp: WpId) -> Result<u64, String> {
        self.count("single_step_warp");
        Ok(self.topo.single_step_result)
    }

    fn suspend_device(&mut self, _dev: DevId) -> Result<(), String> {
        self.count("suspend_device");
        Ok(())
    }

    fn resume_device(&mut self, _dev: DevId) -> Result<(), String> {
        self.count("resume_device");
        Ok(())
    }

    fn get_grid_info(&mut self, dev: DevId, grid_id: u64) -> Result<GridInfo, String> {
        self.count("get_grid_info");
        Ok(self
            .topo
            .grid_infos
            .get(&(dev, grid_id))
            .cloned()
            .unwrap_or(GridInfo {
                grid_id,
                context_id: 0xc0,
                module_id: 0,
                function_entry: 0,
                grid_dim: CuDim3::new(1, 1, 1),
                block_dim: CuDim3::new(1, 1, 1),
                kind: KernelType::Application,
                parent_grid_id: 0,
                origin: KernelOrigin::Gpu,
            }))
    }

    fn get_next_event(&mut self, _kind: EventQueueKind) -> Result<CudaEvent, String> {
        self.count("get_next_event");
        Ok(self.events.pop_front().unwrap_or(CudaEvent::Invalid))
    }

    fn get_attach_state(&mut self) -> AttachState {
        self.attach_state
    }

    fn set_attach_state(&mut self, state: AttachState) {
        self.attach_state = state;
    }

    fn support_batch(&mut self) -> Option<&mut dyn BatchTransport<Error = String>> {
        None
    }
}

/// A [`HostDebugger`] recording every callback.
#[derive(Debug, Default)]
pub(crate) struct MockHost {
    auto_breakpoints: Vec<(u64, u64)>,
    removed_auto: Vec<u64>,
    unresolved: Vec<u64>,
    resolved_images: Vec<u64>,
    removed_count: usize,
    inserted_count: usize,
    messages: Vec<String>,
    loaded_modules: Vec<u64>,
    pub breakpoint_pcs: HashSet<u64>,
    pub pc_lines: HashMap<u64, SourceLine>,
}

impl MockHost {
    pub fn auto_breakpoints(&self) -> Vec<(u64, u64)> {
        self.auto_breakpoints.clone()
    }

    pub fn removed_auto_breakpoints(&self) -> Vec<u64> {
        self.removed_auto.clone()
    }

    pub fn unresolved_contexts(&self) -> Vec<u64> {
        self.unresolved.clone()
    }

    pub fn resolved_images(&self) -> Vec<u64> {
        self.resolved_images.clone()
    }

    pub fn breakpoint_cycles(&self) -> usize {
        self.removed_count.min(self.inserted_count)
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.clone()
    }

    pub fn loaded_modules(&self) -> Vec<u64> {
        self.loaded_modules.clone()
    }
}

impl HostDebugger for MockHost {
    fn resolve_breakpoints(&mut self, elf_image: &ElfImage) {
        self.resolved_images.push(elf_image.image);
    }

    fn unresolve_breakpoints(&mut self, context_id: u64) {
        self.unresolved.push(context_id);
    }

    fn remove_breakpoints(&mut self) {
        self.removed_count += 1;
    }

    fn insert_breakpoints(&mut self) {
        self.inserted_count += 1;
    }

    fn create_auto_breakpoint(&mut self, pc: u64, context_id: u64) {
        self.auto_breakpoints.push((pc, context_id));
    }

    fn remove_auto_breakpoints(&mut self, context_id: u64) {
        self.removed_auto.push(context_id);
    }

    fn breakpoint_here(&mut self, pc: u64) -> bool {
        self.breakpoint_pcs.contains(&pc)
    }

    fn kernel_name_from_pc(&mut self, pc: u64) -> String {
        format!("kernel_0x{:x}", pc)
    }

    fn find_pc_line(&mut self, pc: u64) -> Option<SourceLine> {
        self.pc_lines.get(&pc).cloned()
    }

    fn load_elf_image(&mut self, module_id: u64, _elf_image: &ElfImage) {
        self.loaded_modules.push(module_id);
    }

    fn print_message(&mut self, text: &str) {
        self.messages.push(text.to_string());
    }
}

/// An [`InfoSink`] capturing rows as field-name → rendered-value maps.
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    rows: Vec<HashMap<String, String>>,
    open_row: Option<HashMap<String, String>>,
    texts: Vec<String>,
    messages: Vec<String>,
}

impl RecordingSink {
    pub fn rows(&self) -> &[HashMap<String, String>] {
        &self.rows
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts
            .iter()
            .filter(|t| t.as_str() != "\n")
            .cloned()
            .collect()
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn clear(&mut self) {
        *self = RecordingSink::default();
    }

    fn set(&mut self, field: &str, value: String) {
        if let Some(row) = &mut self.open_row {
            row.insert(field.to_string(), value);
        }
    }
}

impl InfoSink for RecordingSink {
    fn table_begin(&mut self, _name: &str, _num_columns: usize, _num_rows: usize) {}
    fn table_header(&mut self, _width: usize, _align: Align, _field: &str, _title: &str) {}
    fn table_body(&mut self) {}

    fn row_begin(&mut self, _name: &str) {
        self.open_row = Some(HashMap::new());
    }

    fn field_string(&mut self, field: &str, value: &str) {
        self.set(field, value.to_string());
    }

    fn field_int(&mut self, field: &str, value: u64) {
        self.set(field, value.to_string());
    }

    fn field_fmt(&mut self, field: &str, value: core::fmt::Arguments<'_>) {
        self.set(field, value.to_string());
    }

    fn row_end(&mut self) {
        if let Some(row) = self.open_row.take() {
            self.rows.push(row);
        }
    }

    fn table_end(&mut self) {}

    fn text(&mut self, text: &str) {
        self.texts.push(text.to_string());
    }

    fn message(&mut self, text: &str) {
        self.messages.push(text.to_string());
    }
}

/// Build an initialized core over the given topology.
pub(crate) fn core_with_topology(topo: Topology) -> TestCore {
    let with_context = topo.with_context;
    let mut core = CudaCore::new(MockApi::new(topo), MockHost::default(), DebugOptions::default());
    core.system_initialize().expect("mock init");

    if with_context {
        core.process_event(CudaEvent::CtxCreate {
            dev: 0,
            context_id: 0xc0,
            tid: 1,
        })
        .expect("mock context");
    }

    core
}
