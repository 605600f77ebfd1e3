//! The chunk arena: manual reference counting with precise, mark-driven teardown.
//!
//! Addresses are indices into the arena. A freed slot becomes empty and is reused by the
//! next allocation (first fit) before the arena grows. Every chunk starts with a
//! reference count of zero; callers `inc_ref` when they bind it and `dec_ref` when the
//! binding goes away. When a count drops from one to zero the chunk's destructor (if
//! any) runs first, then every member whose mark bit is set is released in turn.
//!
//! Teardown can run user code, so [`dec_ref`] is a free function over a [`HeapHost`]
//! rather than a method: the evaluator implements the trait and is handed in whole.

use std::rc::Rc;

use log::{debug, trace, warn};

use crate::ast::Value;
use crate::context::{AnonymousFunction, Captures, Closure, Namespace};
use crate::{DEFAULT_MAX_CHUNK_BYTES, Error, EvalError};

/// Public handle of a chunk: its index in the arena
pub type Address = usize;

/// Width of one struct member
pub const MEMBER_SIZE: usize = 8;

/// Largest number of members a mark bitmask can describe
pub const MAX_MARKED_MEMBERS: usize = u64::BITS as usize;

const DESTRUCTOR_FLAG: u8 = 0x80;

#[derive(Debug, Clone)]
pub enum ChunkKind {
    Bytes,
    Struct,
    Closure(Rc<Closure>),
}

/// A heap record
#[derive(Debug, Clone)]
pub struct Chunk {
    ref_count: u32,
    kind: ChunkKind,
    member_count: usize,
    mark: u64,
    data: Vec<u8>,
    /// Fully-qualified function name; the global table is name-addressed
    destructor: Option<String>,
}

impl Chunk {
    fn new(kind: ChunkKind, data: Vec<u8>, mark: u64, destructor: Option<String>) -> Self {
        let member_count = match kind {
            ChunkKind::Bytes => 0,
            ChunkKind::Struct | ChunkKind::Closure(_) => data.len() / MEMBER_SIZE,
        };
        Chunk {
            ref_count: 0,
            kind,
            member_count,
            mark,
            data,
            destructor,
        }
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    pub fn kind(&self) -> &ChunkKind {
        &self.kind
    }

    pub fn member_count(&self) -> usize {
        self.member_count
    }

    pub fn mark(&self) -> u64 {
        self.mark
    }

    pub fn byte_size(&self) -> usize {
        self.data.len()
    }

    pub fn destructor(&self) -> Option<&str> {
        self.destructor.as_deref()
    }

    /// Numeric type code: struct 1, bytes 2, closure 4, plus 128 with a destructor
    pub fn type_tag(&self) -> u8 {
        let base = match self.kind {
            ChunkKind::Struct => 1,
            ChunkKind::Bytes => 2,
            ChunkKind::Closure(_) => 4,
        };
        if self.destructor.is_some() {
            base | DESTRUCTOR_FLAG
        } else {
            base
        }
    }

    pub fn is_marked(&self, member_index: usize) -> bool {
        member_index < self.member_count
            && member_index < MAX_MARKED_MEMBERS
            && self.mark & (1 << member_index) != 0
    }

    /// Addresses held by marked members; bytes chunks have no members
    fn referenced_addresses(&self) -> Vec<Address> {
        (0..self.member_count)
            .filter(|&idx| self.is_marked(idx))
            .filter_map(|idx| self.slice(idx * MEMBER_SIZE, MEMBER_SIZE))
            .filter_map(|bytes| <[u8; 8]>::try_from(bytes).ok())
            .map(|bytes| i64::from_le_bytes(bytes) as Address)
            .collect()
    }

    fn slice(&self, offset: usize, width: usize) -> Option<&[u8]> {
        self.data.get(offset..offset.checked_add(width)?)
    }

    fn slice_mut(&mut self, offset: usize, width: usize) -> Option<&mut [u8]> {
        self.data.get_mut(offset..offset.checked_add(width)?)
    }
}

/// Chunk counts reported by [`Heap::status`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStatus {
    pub capacity: usize,
    pub free: usize,
    pub used: usize,
}

/// The arena
#[derive(Debug)]
pub struct Heap {
    chunks: Vec<Option<Chunk>>,
    /// Largest buffer a single chunk may request
    max_chunk_bytes: usize,
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new()
    }
}

impl Heap {
    pub fn new() -> Self {
        Heap::with_max_chunk_bytes(DEFAULT_MAX_CHUNK_BYTES)
    }

    pub fn with_max_chunk_bytes(max_chunk_bytes: usize) -> Self {
        Heap {
            chunks: Vec::new(),
            max_chunk_bytes,
        }
    }

    pub fn max_chunk_bytes(&self) -> usize {
        self.max_chunk_bytes
    }

    pub fn status(&self) -> HeapStatus {
        let capacity = self.chunks.len();
        let free = self.chunks.iter().filter(|slot| slot.is_none()).count();
        HeapStatus {
            capacity,
            free,
            used: capacity - free,
        }
    }

    pub fn chunk(&self, address: Address) -> Result<&Chunk, Error> {
        self.chunks
            .get(address)
            .and_then(Option::as_ref)
            .ok_or_else(|| EvalError::InvalidAddress { address }.into())
    }

    fn chunk_mut(&mut self, address: Address) -> Result<&mut Chunk, Error> {
        self.chunks
            .get_mut(address)
            .and_then(Option::as_mut)
            .ok_or_else(|| EvalError::InvalidAddress { address }.into())
    }

    pub fn is_live(&self, address: Address) -> bool {
        self.chunk(address).is_ok()
    }

    fn insert(&mut self, chunk: Chunk) -> Address {
        let address = match self.chunks.iter().position(Option::is_none) {
            Some(free_slot) => {
                self.chunks[free_slot] = Some(chunk);
                free_slot
            }
            None => {
                self.chunks.push(Some(chunk));
                self.chunks.len() - 1
            }
        };
        trace!("allocated chunk {address}");
        address
    }

    /// A zero-filled buffer, refused when it exceeds the chunk limit or cannot be reserved
    fn zeroed(&self, byte_size: usize) -> Result<Vec<u8>, Error> {
        let too_large = || EvalError::AllocationTooLarge {
            requested: byte_size,
            limit: self.max_chunk_bytes,
        };
        if byte_size > self.max_chunk_bytes {
            return Err(too_large().into());
        }
        let mut data = Vec::new();
        data.try_reserve_exact(byte_size).map_err(|_| too_large())?;
        data.resize(byte_size, 0);
        Ok(data)
    }

    /// Zero-filled byte buffer with no members
    pub fn create_bytes(&mut self, byte_length: usize) -> Result<Address, Error> {
        let data = self.zeroed(byte_length)?;
        Ok(self.insert(Chunk::new(ChunkKind::Bytes, data, 0, None)))
    }

    /// Struct of `byte_size / 8` members; bit i of `mark` flags member i as an address
    pub fn create_struct(&mut self, byte_size: usize, mark: u64) -> Result<Address, Error> {
        let data = self.zeroed(byte_size)?;
        Ok(self.insert(Chunk::new(ChunkKind::Struct, data, mark, None)))
    }

    pub fn create_struct_with_destructor(
        &mut self,
        byte_size: usize,
        mark: u64,
        destructor: impl Into<String>,
    ) -> Result<Address, Error> {
        let data = self.zeroed(byte_size)?;
        Ok(self.insert(Chunk::new(
            ChunkKind::Struct,
            data,
            mark,
            Some(destructor.into()),
        )))
    }

    /// Materialize a closure chunk, taking a reference on every reference capture
    pub fn create_closure(
        &mut self,
        template: AnonymousFunction,
        namespace: Namespace,
        captures: Captures,
    ) -> Result<Address, Error> {
        let references: Vec<Address> = captures.references().collect();
        if references.len() > MAX_MARKED_MEMBERS {
            return Err(Error::invalid_form(
                "fn",
                format!("at most {MAX_MARKED_MEMBERS} reference captures are supported"),
            ));
        }
        // validate everything before touching any count
        for &address in &references {
            self.chunk(address)?;
        }
        for &address in &references {
            self.inc_ref(address)?;
        }

        let closure = Closure::new(template, namespace, captures);
        let mark = match closure.reference_count() {
            MAX_MARKED_MEMBERS => u64::MAX,
            n => (1u64 << n) - 1,
        };
        let values: Vec<i64> = closure
            .captured()
            .map(|(_, value)| match value {
                Value::Number(n) => *n as i64,
                _ => 0,
            })
            .collect();

        let mut chunk = Chunk::new(
            ChunkKind::Closure(Rc::new(closure)),
            vec![0; values.len() * MEMBER_SIZE],
            mark,
            None,
        );
        for (member, value) in chunk.data.chunks_exact_mut(MEMBER_SIZE).zip(values) {
            member.copy_from_slice(&value.to_le_bytes());
        }
        Ok(self.insert(chunk))
    }

    /// The closure stored at `address`, if that chunk is a live closure
    pub fn closure(&self, address: Address) -> Option<Rc<Closure>> {
        match self.chunk(address).map(Chunk::kind) {
            Ok(ChunkKind::Closure(closure)) => Some(Rc::clone(closure)),
            _ => None,
        }
    }

    pub fn inc_ref(&mut self, address: Address) -> Result<u32, Error> {
        let chunk = self.chunk_mut(address)?;
        chunk.ref_count += 1;
        trace!("chunk {address} ref count -> {}", chunk.ref_count);
        Ok(chunk.ref_count)
    }

    /// Drop one reference without tearing down; returns the new count
    fn release(&mut self, address: Address) -> Result<u32, Error> {
        let chunk = self.chunk_mut(address)?;
        chunk.ref_count = chunk
            .ref_count
            .checked_sub(1)
            .ok_or(EvalError::RefCountUnderflow { address })?;
        trace!("chunk {address} ref count -> {}", chunk.ref_count);
        Ok(chunk.ref_count)
    }

    fn reclaim(&mut self, address: Address) -> Result<Chunk, Error> {
        let chunk = self
            .chunks
            .get_mut(address)
            .and_then(Option::take)
            .ok_or(EvalError::InvalidAddress { address })?;
        debug!("freed chunk {address}");
        Ok(chunk)
    }

    /// Store `ref_address` in the member at `byte_offset` and take a reference on it
    ///
    /// The mark bitmask is left alone: it describes the record's shape and is fixed
    /// when the chunk is created.
    pub fn add_ref(
        &mut self,
        address: Address,
        byte_offset: usize,
        ref_address: Address,
    ) -> Result<u32, Error> {
        self.chunk(ref_address)?;
        self.write_i64(address, byte_offset, ref_address as i64)?;
        self.inc_ref(ref_address)
    }

    fn read<const N: usize>(&self, address: Address, offset: usize) -> Result<[u8; N], Error> {
        let chunk = self.chunk(address)?;
        chunk
            .slice(offset, N)
            .and_then(|bytes| <[u8; N]>::try_from(bytes).ok())
            .ok_or_else(|| {
                EvalError::OutOfBounds {
                    address,
                    offset,
                    width: N,
                    size: chunk.byte_size(),
                }
                .into()
            })
    }

    fn write<const N: usize>(
        &mut self,
        address: Address,
        offset: usize,
        bytes: [u8; N],
    ) -> Result<(), Error> {
        let chunk = self.chunk_mut(address)?;
        if matches!(chunk.kind, ChunkKind::Closure(_)) {
            return Err(EvalError::ReadOnlyChunk { address }.into());
        }
        let size = chunk.byte_size();
        let target = chunk
            .slice_mut(offset, N)
            .ok_or(EvalError::OutOfBounds {
                address,
                offset,
                width: N,
                size,
            })?;
        target.copy_from_slice(&bytes);
        Ok(())
    }

    pub fn read_i32(&self, address: Address, byte_offset: usize) -> Result<i32, Error> {
        self.read(address, byte_offset).map(i32::from_le_bytes)
    }

    pub fn read_i64(&self, address: Address, byte_offset: usize) -> Result<i64, Error> {
        self.read(address, byte_offset).map(i64::from_le_bytes)
    }

    pub fn write_i32(&mut self, address: Address, byte_offset: usize, value: i32) -> Result<(), Error> {
        self.write(address, byte_offset, value.to_le_bytes())
    }

    pub fn write_i64(&mut self, address: Address, byte_offset: usize, value: i64) -> Result<(), Error> {
        self.write(address, byte_offset, value.to_le_bytes())
    }

    /// The address stored at `byte_offset`
    pub fn read_address(&self, address: Address, byte_offset: usize) -> Result<Address, Error> {
        let raw = self.read_i64(address, byte_offset)?;
        Address::try_from(raw).map_err(|_| {
            EvalError::TypeMismatch {
                expected: "address",
                found: raw.to_string(),
            }
            .into()
        })
    }

    pub fn read_mark(&self, address: Address, member_index: usize) -> Result<bool, Error> {
        Ok(self.chunk(address)?.is_marked(member_index))
    }
}

/// Owner of a heap that can run destructors during teardown
pub trait HeapHost {
    fn heap(&mut self) -> &mut Heap;

    /// Invoke the function registered under `destructor` with the dying chunk's address
    fn run_destructor(&mut self, destructor: &str, address: Address) -> Result<(), Error>;
}

/// A bare heap can tear down everything except chunks that carry a destructor
impl HeapHost for Heap {
    fn heap(&mut self) -> &mut Heap {
        self
    }

    fn run_destructor(&mut self, destructor: &str, _address: Address) -> Result<(), Error> {
        Err(EvalError::DestructorUnavailable {
            name: destructor.to_owned(),
        }
        .into())
    }
}

/// Drop one reference to `address`, tearing the chunk down when the count reaches zero
///
/// Teardown runs the destructor (if any) while the chunk is still readable, frees
/// the slot, then releases every marked member. Members that reach zero are queued
/// on an explicit worklist, so long reference chains do not grow the host stack.
///
/// Once the count has reached zero the teardown always completes: a failing
/// destructor (or a member that was already released behind the heap's back) does
/// not stop the remaining chunks from being freed. The first such error is returned
/// after the worklist is drained.
pub fn dec_ref(host: &mut dyn HeapHost, address: Address) -> Result<u32, Error> {
    let remaining = host.heap().release(address)?;
    if remaining > 0 {
        return Ok(remaining);
    }

    let mut first_error: Option<Error> = None;
    let mut pending = vec![address];
    while let Some(address) = pending.pop() {
        let destructor = match host.heap().chunk(address) {
            Ok(chunk) => chunk.destructor.clone(),
            Err(err) => {
                first_error.get_or_insert(err);
                continue;
            }
        };
        if let Some(destructor) = destructor {
            debug!("running destructor {destructor} for chunk {address}");
            if let Err(err) = host.run_destructor(&destructor, address) {
                warn!("destructor {destructor} for chunk {address} failed: {err}");
                first_error.get_or_insert(err);
            }
        }
        let chunk = match host.heap().reclaim(address) {
            Ok(chunk) => chunk,
            Err(err) => {
                first_error.get_or_insert(err);
                continue;
            }
        };
        for member in chunk.referenced_addresses() {
            match host.heap().release(member) {
                Ok(0) => pending.push(member),
                Ok(_) => {}
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(0),
    }
}
