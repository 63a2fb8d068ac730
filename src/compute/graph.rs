//! Frame-scoped dependency graph of uploads, dispatches and display hand-off.
//!
//! Every node declares the buffers it reads and writes; ordering edges are
//! derived from overlap (read-after-write, write-after-read, write-after-write).
//! Submission order is always a valid topological order of the result.

use super::backend::BufferHandle;
use super::kernel::{Kernel, KernelArg, KernelArgs};
use crate::error::KernelError;
use smallvec::SmallVec;
use std::collections::HashMap;

pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq)]
pub enum NodeOp {
    Upload { buffer: BufferHandle, offset: u64, data: Vec<u8> },
    Dispatch { kernel: Kernel, args: KernelArgs, workgroups: [u32; 3], local_size: [u32; 3] },
    AcquireDisplay(BufferHandle),
    ReleaseDisplay(BufferHandle),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchNode {
    pub label: &'static str,
    pub op: NodeOp,
    reads: SmallVec<[BufferHandle; 4]>,
    writes: SmallVec<[BufferHandle; 2]>,
    deps: SmallVec<[NodeId; 4]>,
}

impl DispatchNode {
    pub fn reads(&self) -> &[BufferHandle] {
        &self.reads
    }

    pub fn writes(&self) -> &[BufferHandle] {
        &self.writes
    }

    pub fn dependencies(&self) -> &[NodeId] {
        &self.deps
    }

    pub fn kernel(&self) -> Option<Kernel> {
        match &self.op {
            NodeOp::Dispatch { kernel, .. } => Some(*kernel),
            _ => None,
        }
    }

    pub fn touches(&self, buffer: BufferHandle) -> bool {
        self.reads.contains(&buffer) || self.writes.contains(&buffer)
    }
}

#[derive(Debug, Default)]
pub struct DispatchGraph {
    nodes: Vec<DispatchNode>,
    last_writer: HashMap<BufferHandle, NodeId>,
    readers_since_write: HashMap<BufferHandle, SmallVec<[NodeId; 4]>>,
}

impl DispatchGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &[DispatchNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Copies `data` into `buffer` at `offset` once every earlier access to it has finished.
    pub fn upload(&mut self, label: &'static str, buffer: BufferHandle, offset: u64, data: Vec<u8>) -> NodeId {
        let writes = SmallVec::from_slice(&[buffer]);
        self.push(label, NodeOp::Upload { buffer, offset, data }, SmallVec::new(), writes, SmallVec::new())
    }

    /// Records a kernel dispatch after checking its arguments against the kernel signature.
    pub fn dispatch(
        &mut self,
        kernel: Kernel,
        args: KernelArgs,
        workgroups: [u32; 3],
        local_size: [u32; 3],
    ) -> Result<NodeId, KernelError> {
        kernel.validate(&args)?;
        let mut reads = SmallVec::new();
        let mut writes = SmallVec::new();
        for (param, arg) in kernel.signature().iter().zip(args.iter()) {
            let KernelArg::Buffer(handle) = arg else { continue };
            if param.reads() && !reads.contains(handle) {
                reads.push(*handle);
            }
            if param.writes() && !writes.contains(handle) {
                writes.push(*handle);
            }
        }
        let op = NodeOp::Dispatch { kernel, args, workgroups, local_size };
        Ok(self.push(kernel.timer_label(), op, reads, writes, SmallVec::new()))
    }

    /// Hands `display` to compute. Ordered after every node recorded so far.
    pub fn acquire_display(&mut self, display: BufferHandle) -> NodeId {
        let all: SmallVec<[NodeId; 4]> = (0..self.nodes.len()).collect();
        let writes = SmallVec::from_slice(&[display]);
        self.push("Acquire display", NodeOp::AcquireDisplay(display), SmallVec::new(), writes, all)
    }

    pub fn release_display(&mut self, display: BufferHandle) -> NodeId {
        let writes = SmallVec::from_slice(&[display]);
        self.push("Release display", NodeOp::ReleaseDisplay(display), SmallVec::new(), writes, SmallVec::new())
    }

    fn push(
        &mut self,
        label: &'static str,
        op: NodeOp,
        reads: SmallVec<[BufferHandle; 4]>,
        writes: SmallVec<[BufferHandle; 2]>,
        mut deps: SmallVec<[NodeId; 4]>,
    ) -> NodeId {
        let id = self.nodes.len();
        for buffer in &reads {
            if let Some(&writer) = self.last_writer.get(buffer) {
                deps.push(writer);
            }
        }
        for buffer in &writes {
            if let Some(&writer) = self.last_writer.get(buffer) {
                deps.push(writer);
            }
            if let Some(readers) = self.readers_since_write.get(buffer) {
                deps.extend(readers.iter().copied().filter(|&reader| reader != id));
            }
        }
        deps.sort_unstable();
        deps.dedup();

        for buffer in &reads {
            if !writes.contains(buffer) {
                self.readers_since_write.entry(*buffer).or_default().push(id);
            }
        }
        for buffer in &writes {
            self.last_writer.insert(*buffer, id);
            self.readers_since_write.remove(buffer);
        }
        self.nodes.push(DispatchNode { label, op, reads, writes, deps });
        id
    }

    pub fn dependencies(&self, node: NodeId) -> &[NodeId] {
        self.nodes.get(node).map(|n| n.dependencies()).unwrap_or(&[])
    }

    /// Whether `later` transitively waits on `earlier`.
    pub fn depends_on(&self, later: NodeId, earlier: NodeId) -> bool {
        let mut stack = vec![later];
        let mut seen = vec![false; self.nodes.len()];
        while let Some(node) = stack.pop() {
            for &dep in self.dependencies(node) {
                if dep == earlier {
                    return true;
                }
                if dep > earlier && !seen[dep] {
                    seen[dep] = true;
                    stack.push(dep);
                }
            }
        }
        false
    }

    pub fn count(&self, kernel: Kernel) -> usize {
        self.nodes.iter().filter(|node| node.kernel() == Some(kernel)).count()
    }

    pub fn dispatches(&self) -> impl Iterator<Item = (NodeId, &DispatchNode)> {
        self.nodes.iter().enumerate().filter(|(_, node)| node.kernel().is_some())
    }

    pub fn references(&self, buffer: BufferHandle) -> bool {
        self.nodes.iter().any(|node| node.touches(buffer))
    }

    /// Longest-path depth of each node. Nodes sharing a level have no ordering edge between them.
    pub fn levels(&self) -> Vec<usize> {
        let mut levels = vec![0usize; self.nodes.len()];
        for (id, node) in self.nodes.iter().enumerate() {
            levels[id] = node.deps.iter().map(|&dep| levels[dep] + 1).max().unwrap_or(0);
        }
        levels
    }

    /// Node count of the widest level.
    pub fn max_parallelism(&self) -> usize {
        let levels = self.levels();
        let mut widths: HashMap<usize, usize> = HashMap::new();
        for level in levels {
            *widths.entry(level).or_default() += 1;
        }
        widths.values().copied().max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    const RAYS: BufferHandle = BufferHandle(1);
    const ACCUM: BufferHandle = BufferHandle(2);
    const LIGHTS: BufferHandle = BufferHandle(3);
    const VERTS_A: BufferHandle = BufferHandle(4);
    const VERTS_B: BufferHandle = BufferHandle(5);
    const BASE_A: BufferHandle = BufferHandle(6);
    const BASE_B: BufferHandle = BufferHandle(7);

    fn transform(graph: &mut DispatchGraph, base: BufferHandle, out: BufferHandle) -> NodeId {
        graph
            .dispatch(
                Kernel::TransformVertices,
                smallvec![
                    KernelArg::Buffer(base),
                    KernelArg::Buffer(out),
                    KernelArg::Mat4(glam::Mat4::IDENTITY),
                    KernelArg::Mat4(glam::Mat4::IDENTITY),
                    KernelArg::U32(3),
                ],
                [1, 1, 1],
                [64, 1, 1],
            )
            .unwrap()
    }

    fn accumulate(graph: &mut DispatchGraph, light: u32) -> NodeId {
        graph
            .dispatch(
                Kernel::Accumulate,
                smallvec![
                    KernelArg::Buffer(ACCUM),
                    KernelArg::Buffer(RAYS),
                    KernelArg::U32(16),
                    KernelArg::Buffer(LIGHTS),
                    KernelArg::U32(light),
                ],
                [1, 1, 1],
                [64, 1, 1],
            )
            .unwrap()
    }

    #[test]
    fn independent_transforms_share_a_level() {
        let mut graph = DispatchGraph::new();
        let a = transform(&mut graph, BASE_A, VERTS_A);
        let b = transform(&mut graph, BASE_B, VERTS_B);
        assert!(graph.dependencies(b).is_empty());
        assert_eq!(graph.levels()[a], graph.levels()[b]);
        assert_eq!(graph.max_parallelism(), 2);
    }

    #[test]
    fn accumulates_are_serialized_through_shared_buffer() {
        let mut graph = DispatchGraph::new();
        let upload = graph.upload("Write lights", LIGHTS, 0, vec![0; 32]);
        let first = accumulate(&mut graph, 0);
        let second = accumulate(&mut graph, 1);
        assert_eq!(graph.dependencies(first), &[upload]);
        assert!(graph.dependencies(second).contains(&first));
        assert!(graph.depends_on(second, upload));
    }

    #[test]
    fn write_after_read_orders_the_writer() {
        let mut graph = DispatchGraph::new();
        let reader = accumulate(&mut graph, 0);
        let rewrite = graph.upload("Write lights", LIGHTS, 0, vec![0; 32]);
        assert_eq!(graph.dependencies(rewrite), &[reader]);
    }

    #[test]
    fn acquire_waits_for_everything() {
        let mut graph = DispatchGraph::new();
        let a = transform(&mut graph, BASE_A, VERTS_A);
        let b = transform(&mut graph, BASE_B, VERTS_B);
        let display = BufferHandle(9);
        let acquire = graph.acquire_display(display);
        assert_eq!(graph.dependencies(acquire), &[a, b]);
        let release = graph.release_display(display);
        assert_eq!(graph.dependencies(release), &[acquire]);
        assert!(graph.references(display));
        assert!(!graph.references(BufferHandle(42)));
    }

    #[test]
    fn invalid_dispatch_is_rejected_without_recording() {
        let mut graph = DispatchGraph::new();
        let err = graph.dispatch(Kernel::MoveRays, smallvec![KernelArg::U32(1)], [1, 1, 1], [64, 1, 1]);
        assert!(err.is_err());
        assert!(graph.is_empty());
    }
}
