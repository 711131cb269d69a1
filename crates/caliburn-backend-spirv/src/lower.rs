//! Per-opcode lowering.
//!
//! Every IR opcode has exactly one entry in [`LOWERINGS`], indexed by its
//! ordinal. Lowerings record recoverable problems on the translator and
//! keep going; only an `Err` stops translation.

use caliburn_ir::{
    BuiltIn, Instruction, LowType, OPCODE_COUNT, Opcode, Operator, ShaderStage, Ssa,
    VarModifiers, split_wide,
};

use crate::builtins::{self, BuiltInType};
use crate::error::TranslateError;
use crate::module::{Section, encode};
use crate::spirv::{
    self, built_in, capability, decoration, execution_mode, execution_model, glsl, op,
    storage_class,
};
use crate::translator::{FunctionState, Place, Scalar, Translator};

type Lowered = Result<(), TranslateError>;

pub(crate) type LowerFn = fn(&mut Translator<'_>, usize, &Instruction) -> Lowered;

/// Dispatch table, indexed by opcode ordinal.
pub(crate) static LOWERINGS: [LowerFn; OPCODE_COUNT] = {
    let mut table = [unsupported as LowerFn; OPCODE_COUNT];
    let mut i = 0;
    while i < OPCODE_COUNT {
        table[i] = lowering(Opcode::ALL[i]);
        i += 1;
    }
    table
};

const fn lowering(opcode: Opcode) -> LowerFn {
    match opcode {
        Opcode::Unknown => unsupported,
        Opcode::ShaderStage => shader_stage,
        Opcode::ShaderStageEnd => shader_stage_end,
        Opcode::Function => function,
        Opcode::VarFuncArg => function_parameter,
        Opcode::FunctionEnd => function_end,
        Opcode::VarLocal => local_variable,
        Opcode::VarGlobal => global_variable,
        Opcode::VarShaderIn | Opcode::VarShaderOut => shader_io,
        Opcode::VarDescriptor => descriptor,
        Opcode::Call => call,
        Opcode::TypeVoid
        | Opcode::TypeFloat
        | Opcode::TypeIntSign
        | Opcode::TypeIntUnsign
        | Opcode::TypeArray
        | Opcode::TypeVector
        | Opcode::TypeMatrix
        | Opcode::TypeStruct
        | Opcode::TypeBool
        | Opcode::TypePtr
        | Opcode::TypeTuple => declare_type,
        Opcode::CallArg
        | Opcode::StructMember
        | Opcode::StructEnd
        | Opcode::ConstructArg
        | Opcode::LitArrayElem => trailer,
        Opcode::Label => label,
        Opcode::Jump => jump,
        Opcode::JumpCond => jump_cond,
        Opcode::Loop => loop_merge,
        Opcode::Assign => assign,
        Opcode::Compare => compare,
        Opcode::ValueCast => value_cast,
        Opcode::ValueConstruct => value_construct,
        Opcode::ValueDeref | Opcode::ValueReadVar => value_read_var,
        Opcode::ValueExpand => value_expand,
        Opcode::ValueExpr => value_expr,
        Opcode::ValueExprUnary => value_expr_unary,
        Opcode::ValueIntToFp => value_int_to_fp,
        Opcode::ValueInvokePos => value_invoke_pos,
        Opcode::ValueInvokeSize => value_invoke_size,
        Opcode::ValueBuiltIn => value_builtin,
        Opcode::ValueLitArray => value_lit_array,
        Opcode::ValueLitBool => value_lit_bool,
        Opcode::ValueLitFp => value_lit_fp,
        Opcode::ValueLitInt => value_lit_int,
        Opcode::ValueLitStr => value_lit_str,
        Opcode::ValueMember => value_member,
        Opcode::ValueNull | Opcode::ValueZero => value_null,
        Opcode::ValueSign | Opcode::ValueUnsign => value_sign,
        Opcode::ValueSubarray => value_subarray,
        Opcode::ValueVecSwizzle => value_vec_swizzle,
        Opcode::Return => return_void,
        Opcode::ReturnValue => return_value,
        Opcode::Discard => discard,
    }
}

fn unsupported(_: &mut Translator<'_>, _: usize, inst: &Instruction) -> Lowered {
    Err(TranslateError::Unsupported(inst.opcode))
}

/// Trailers are consumed by their header.
fn trailer(_: &mut Translator<'_>, _: usize, _: &Instruction) -> Lowered {
    Ok(())
}

// --- Shader stages -----------------------------------------------------------

fn model_for(stage: ShaderStage) -> u32 {
    match stage {
        ShaderStage::Compute => execution_model::GL_COMPUTE,
        ShaderStage::Vertex => execution_model::VERTEX,
        ShaderStage::Fragment => execution_model::FRAGMENT,
        ShaderStage::TessCtrl => execution_model::TESSELLATION_CONTROL,
        ShaderStage::TessEval => execution_model::TESSELLATION_EVALUATION,
        ShaderStage::Geometry => execution_model::GEOMETRY,
        ShaderStage::RayGen => execution_model::RAY_GENERATION_KHR,
        ShaderStage::RayClosestHit => execution_model::CLOSEST_HIT_KHR,
        ShaderStage::RayAnyHit => execution_model::ANY_HIT_KHR,
        ShaderStage::RayIntersect => execution_model::INTERSECTION_KHR,
        ShaderStage::RayMiss => execution_model::MISS_KHR,
        ShaderStage::Task => execution_model::TASK_EXT,
        ShaderStage::Mesh => execution_model::MESH_EXT,
    }
}

fn shader_stage(t: &mut Translator<'_>, index: usize, inst: &Instruction) -> Lowered {
    let Some(stage) = ShaderStage::from_u32(inst.operands[0]) else {
        t.error(inst, format!("unknown shader stage {}", inst.operands[0]));
        return Ok(());
    };
    if let Some(open) = t.stage {
        t.error(inst, format!("{open} stage is still open"));
    }

    match stage {
        ShaderStage::Geometry => t.module.require_capability(capability::GEOMETRY),
        ShaderStage::TessCtrl | ShaderStage::TessEval => {
            t.module.require_capability(capability::TESSELLATION);
        }
        ShaderStage::Task | ShaderStage::Mesh => {
            t.module.require_capability(capability::MESH_SHADING_EXT);
            t.module.require_extension("SPV_EXT_mesh_shader");
        }
        ShaderStage::RayGen
        | ShaderStage::RayClosestHit
        | ShaderStage::RayAnyHit
        | ShaderStage::RayIntersect
        | ShaderStage::RayMiss => {
            t.module.require_capability(capability::RAY_TRACING_KHR);
            t.module.require_extension("SPV_KHR_ray_tracing");
        }
        ShaderStage::Compute | ShaderStage::Vertex | ShaderStage::Fragment => {}
    }

    let io: Vec<Ssa> = t
        .code
        .iter()
        .skip(index + 1)
        .take_while(|i| i.opcode != Opcode::ShaderStageEnd)
        .filter(|i| matches!(i.opcode, Opcode::VarShaderIn | Opcode::VarShaderOut))
        .map(|i| i.id)
        .collect();
    if io.len() != inst.operands[1] as usize {
        t.error(
            inst,
            format!("declares {} inputs and outputs, found {}", inst.operands[1], io.len()),
        );
    }
    let interface = io.into_iter().map(|ssa| t.id(ssa)).collect();

    log::debug!("lowering {stage} stage");
    t.stage = Some(stage);
    t.begin_entry_point(model_for(stage), interface);
    Ok(())
}

fn shader_stage_end(t: &mut Translator<'_>, _: usize, inst: &Instruction) -> Lowered {
    let (Some(stage), Some(entry)) = (t.stage.take(), t.entry) else {
        t.error(inst, "no shader stage is open");
        return Ok(());
    };
    let target = t.id(inst.refs[0]);
    let function = match stage {
        ShaderStage::Vertex
        | ShaderStage::Fragment
        | ShaderStage::TessCtrl
        | ShaderStage::TessEval
        | ShaderStage::Geometry => wrap_entry(t, inst, stage, target),
        _ => target,
    };

    match stage {
        ShaderStage::Compute | ShaderStage::Task | ShaderStage::Mesh => {
            let size = inst.operands.map(|n| n.max(1));
            t.module
                .add_execution_mode(function, execution_mode::LOCAL_SIZE, &size);
        }
        ShaderStage::Fragment => {
            t.module
                .add_execution_mode(function, execution_mode::ORIGIN_UPPER_LEFT, &[]);
        }
        _ => {}
    }
    if let Some(entry) = t.module.entry_point_mut(entry) {
        entry.function = function;
    }
    t.entry = None;
    Ok(())
}

fn is_vec4_f32(t: &Translator<'_>, ty: Ssa) -> bool {
    match t.asm.low_type(ty) {
        Some(LowType::Vector { inner, lanes: 4 }) => {
            *t.asm.resolve(*inner) == LowType::Float { width: 32 }
        }
        _ => false,
    }
}

/// Synthesizes a `void main()` that calls the stage's entry function and
/// writes its result to the stage output.
fn wrap_entry(t: &mut Translator<'_>, inst: &Instruction, stage: ShaderStage, target: u32) -> u32 {
    let entry_fn = inst.refs[0];
    let ret_ir = t
        .asm
        .code_for(entry_fn)
        .map_or(Ssa::VOID, |f| f.refs[0]);
    let void = t.module.type_void();
    let returns_value = !matches!(t.asm.low_type(ret_ir), None | Some(LowType::Void));
    let ret = if returns_value {
        t.lower_type(ret_ir).unwrap_or(void)
    } else {
        void
    };

    let fn_ty = t.module.type_function(void, &[]);
    let main = t.module.alloc_id();
    let label = t.module.alloc_id();
    let result = t.module.alloc_id();
    let mut words = Vec::new();
    encode(&mut words, op::FUNCTION, &[void, main, 0, fn_ty]);
    encode(&mut words, op::LABEL, &[label]);
    encode(&mut words, op::FUNCTION_CALL, &[ret, result, target]);

    if returns_value {
        if !is_vec4_f32(t, ret_ir) {
            t.error(inst, format!("{stage} entry points must return vec4<f32>"));
        } else if stage == ShaderStage::Vertex {
            let block = per_vertex(t);
            let zero = t.module.const_i32(0);
            let ptr_ty = t.module.type_pointer(storage_class::OUTPUT, ret);
            let position = t.module.alloc_id();
            encode(&mut words, op::ACCESS_CHAIN, &[ptr_ty, position, block, zero]);
            encode(&mut words, op::STORE, &[position, result]);
        } else if stage == ShaderStage::Fragment {
            let color = frag_output(t, ret);
            encode(&mut words, op::STORE, &[color, result]);
        } else {
            t.error(inst, format!("{stage} entry points cannot return a value"));
        }
    }

    encode(&mut words, op::RETURN, &[]);
    encode(&mut words, op::FUNCTION_END, &[]);
    t.module.append(Section::Functions, &words);
    t.module.name(main, "main");
    main
}

/// The `gl_PerVertex` output block.
fn per_vertex(t: &mut Translator<'_>) -> u32 {
    if let Some(var) = t.per_vertex {
        t.add_interface(var);
        return var;
    }
    let f32_ = t.module.type_float(32);
    let vec4 = t.module.type_vector(f32_, 4);
    let distances = t.module.type_array(f32_, 1);
    let block = t
        .module
        .unique_ty(op::TYPE_STRUCT, &[vec4, f32_, distances, distances]);
    t.module.decorate(block, decoration::BLOCK, &[]);
    t.module.name(block, "gl_PerVertex");
    let members = [
        ("gl_Position", built_in::POSITION),
        ("gl_PointSize", built_in::POINT_SIZE),
        ("gl_ClipDistance", built_in::CLIP_DISTANCE),
        ("gl_CullDistance", built_in::CULL_DISTANCE),
    ];
    for (index, (name, builtin)) in members.into_iter().enumerate() {
        t.module
            .member_decorate(block, index as u32, decoration::BUILT_IN, &[builtin]);
        t.module.member_name(block, index as u32, name);
    }

    let ptr_ty = t.module.type_pointer(storage_class::OUTPUT, block);
    let var = t.module.alloc_id();
    t.module
        .emit(Section::Globals, op::VARIABLE, &[ptr_ty, var, storage_class::OUTPUT]);
    t.per_vertex = Some(var);
    t.add_interface(var);
    var
}

/// The location 0 color output of fragment stages.
fn frag_output(t: &mut Translator<'_>, ty: u32) -> u32 {
    if let Some(var) = t.frag_output {
        t.add_interface(var);
        return var;
    }
    let ptr_ty = t.module.type_pointer(storage_class::OUTPUT, ty);
    let var = t.module.alloc_id();
    t.module
        .emit(Section::Globals, op::VARIABLE, &[ptr_ty, var, storage_class::OUTPUT]);
    t.module.decorate(var, decoration::LOCATION, &[0]);
    t.module.name(var, "out_color");
    t.frag_output = Some(var);
    t.add_interface(var);
    var
}

// --- Functions and variables -------------------------------------------------

fn function(t: &mut Translator<'_>, index: usize, inst: &Instruction) -> Lowered {
    if let Some(open) = t.function.take() {
        t.error(inst, format!("{} is still open", open.ir));
        t.close_function(open);
    }
    let void = t.module.type_void();
    let ret = t.require_type(inst, inst.refs[0]).unwrap_or(void);
    let returns_void = ret == void;

    let args = t.trailers(index, Opcode::VarFuncArg, inst.operands[0]);
    if args.len() != inst.operands[0] as usize {
        t.error(
            inst,
            format!("declares {} parameters, found {}", inst.operands[0], args.len()),
        );
    }
    let mut params = Vec::with_capacity(args.len());
    for arg in &args {
        if let Some(ty) = t.require_type(arg, arg.refs[0]) {
            params.push(ty);
        }
    }
    let fn_ty = t.module.type_function(ret, &params);
    let id = t.id(inst.id);

    let mut header = Vec::new();
    encode(&mut header, op::FUNCTION, &[ret, id, 0, fn_ty]);
    t.function = Some(FunctionState {
        ir: inst.id,
        returns_void,
        header,
        variables: Vec::new(),
        body: Vec::new(),
        labelled: false,
        terminated: false,
    });
    Ok(())
}

fn function_parameter(t: &mut Translator<'_>, _: usize, inst: &Instruction) -> Lowered {
    let Some(ty) = t.lower_type(inst.refs[0]) else {
        return Ok(());
    };
    let id = t.id(inst.id);
    t.params.insert(inst.id);
    match t.function.as_mut() {
        Some(function) if function.body.is_empty() => {
            encode(&mut function.header, op::FUNCTION_PARAMETER, &[ty, id]);
        }
        _ => t.error(inst, "parameters must directly follow their function"),
    }
    Ok(())
}

fn function_end(t: &mut Translator<'_>, _: usize, inst: &Instruction) -> Lowered {
    match t.function.take() {
        Some(function) => {
            if function.ir != inst.refs[0] {
                t.error(inst, format!("closes {} but {} is open", inst.refs[0], function.ir));
            }
            t.close_function(function);
        }
        None => t.error(inst, "no function is open"),
    }
    Ok(())
}

fn local_variable(t: &mut Translator<'_>, _: usize, inst: &Instruction) -> Lowered {
    let Some(pointee) = t.require_type(inst, inst.refs[0]) else {
        return Ok(());
    };
    let shared = VarModifiers::from_bits(inst.operands[0]).contains(VarModifiers::SHARED);
    let class = if shared {
        storage_class::WORKGROUP
    } else {
        storage_class::FUNCTION
    };
    let init = inst.refs[1];
    let init = (!init.is_void()).then(|| t.value(inst, init));
    let constant = init.filter(|&v| class == storage_class::FUNCTION && t.module.is_constant(v));

    let id = t.id(inst.id);
    if let Some(place) = t.declare_variable(inst, id, class, pointee, constant) {
        t.places.insert(inst.id, place);
        if let (Some(value), None) = (init, constant) {
            t.emit_fn(inst, op::STORE, &[id, value]);
        }
    }
    Ok(())
}

fn global_variable(t: &mut Translator<'_>, _: usize, inst: &Instruction) -> Lowered {
    let Some(pointee) = t.require_type(inst, inst.refs[0]) else {
        return Ok(());
    };
    let init = match inst.refs[1] {
        Ssa::VOID => None,
        ssa => {
            let value = t.value(inst, ssa);
            if !t.module.is_constant(value) {
                t.error(inst, "global initializers must be constant");
            }
            t.module.is_constant(value).then_some(value)
        }
    };
    let id = t.id(inst.id);
    if let Some(place) = t.declare_variable(inst, id, storage_class::PRIVATE, pointee, init) {
        t.places.insert(inst.id, place);
    }
    Ok(())
}

fn shader_io(t: &mut Translator<'_>, _: usize, inst: &Instruction) -> Lowered {
    let Some(pointee) = t.require_type(inst, inst.refs[0]) else {
        return Ok(());
    };
    let class = match inst.opcode {
        Opcode::VarShaderIn => storage_class::INPUT,
        _ => storage_class::OUTPUT,
    };
    let id = t.id(inst.id);
    if let Some(place) = t.declare_variable(inst, id, class, pointee, None) {
        t.module.decorate(id, decoration::LOCATION, &[inst.operands[0]]);
        t.places.insert(inst.id, place);
        t.add_interface(id);
    }
    Ok(())
}

fn descriptor(t: &mut Translator<'_>, _: usize, inst: &Instruction) -> Lowered {
    let asm = t.asm;
    let ty = inst.refs[0];
    let Some(pointee) = t.require_type(inst, ty) else {
        return Ok(());
    };
    match asm.struct_layout(ty) {
        Some(layout) => {
            let mut offset = 0u32;
            let members: Vec<(u32, u32)> = layout
                .members()
                .iter()
                .map(|(_, member)| {
                    let align = (asm.bit_align(*member).unwrap_or(8) / 8).max(1);
                    let size = asm.bit_width(*member).unwrap_or(0) / 8;
                    offset = offset.next_multiple_of(align);
                    let at = offset;
                    offset += size;
                    (at, size)
                })
                .collect();
            if t.module.declaration(pointee).is_some() {
                t.module.decorate_once(pointee, decoration::BLOCK, &[]);
            }
            for (index, (at, _)) in members.into_iter().enumerate() {
                t.module
                    .member_decorate(pointee, index as u32, decoration::OFFSET, &[at]);
            }
        }
        None => t.error(inst, "descriptors must have a struct type"),
    }

    let id = t.id(inst.id);
    if let Some(place) = t.declare_variable(inst, id, storage_class::UNIFORM, pointee, None) {
        t.module
            .decorate(id, decoration::DESCRIPTOR_SET, &[inst.operands[0]]);
        t.module.decorate(id, decoration::BINDING, &[inst.operands[1]]);
        t.places.insert(inst.id, place);
    }
    Ok(())
}

fn call(t: &mut Translator<'_>, index: usize, inst: &Instruction) -> Lowered {
    let args = t.trailers(index, Opcode::CallArg, inst.operands[0]);
    if args.len() != inst.operands[0] as usize {
        t.error(
            inst,
            format!("passes {} arguments, found {}", inst.operands[0], args.len()),
        );
    }
    let Some(ret) = t.require_type(inst, inst.result_type) else {
        return Ok(());
    };
    let callee = t.id(inst.refs[0]);
    let id = t.id(inst.id);
    let mut operands = vec![ret, id, callee];
    for arg in &args {
        operands.push(t.value(arg, arg.refs[0]));
    }
    t.emit_fn(inst, op::FUNCTION_CALL, &operands);
    Ok(())
}

fn declare_type(t: &mut Translator<'_>, _: usize, inst: &Instruction) -> Lowered {
    t.require_type(inst, inst.id);
    Ok(())
}

// --- Control flow ------------------------------------------------------------

fn label(t: &mut Translator<'_>, _: usize, inst: &Instruction) -> Lowered {
    let id = t.id(inst.id);
    t.begin_block(inst, id);
    Ok(())
}

fn jump(t: &mut Translator<'_>, _: usize, inst: &Instruction) -> Lowered {
    let target = t.id(inst.refs[0]);
    t.terminate(inst, op::BRANCH, &[target]);
    Ok(())
}

fn jump_cond(t: &mut Translator<'_>, _: usize, inst: &Instruction) -> Lowered {
    let cond = t.value(inst, inst.refs[0]);
    let on_true = t.id(inst.refs[1]);
    let on_false = t.id(inst.refs[2]);
    t.terminate(inst, op::BRANCH_CONDITIONAL, &[cond, on_true, on_false]);
    Ok(())
}

fn loop_merge(t: &mut Translator<'_>, _: usize, inst: &Instruction) -> Lowered {
    let merge = t.id(inst.refs[0]);
    let cont = t.id(inst.refs[1]);
    t.emit_fn(inst, op::LOOP_MERGE, &[merge, cont, spirv::LOOP_CONTROL_NONE]);
    Ok(())
}

fn return_void(t: &mut Translator<'_>, _: usize, inst: &Instruction) -> Lowered {
    t.terminate(inst, op::RETURN, &[]);
    Ok(())
}

fn return_value(t: &mut Translator<'_>, _: usize, inst: &Instruction) -> Lowered {
    let value = t.value(inst, inst.refs[0]);
    t.terminate(inst, op::RETURN_VALUE, &[value]);
    Ok(())
}

fn discard(t: &mut Translator<'_>, _: usize, inst: &Instruction) -> Lowered {
    t.terminate(inst, op::KILL, &[]);
    Ok(())
}

// --- Memory ------------------------------------------------------------------

fn assign(t: &mut Translator<'_>, _: usize, inst: &Instruction) -> Lowered {
    let target = inst.refs[0];
    if t.params.contains(&target) {
        t.error(inst, format!("{target} is a parameter and cannot be assigned"));
        return Ok(());
    }
    let Some(place) = t.places.get(&target).copied() else {
        t.error(inst, format!("{target} is not assignable"));
        return Ok(());
    };
    let value = t.value(inst, inst.refs[1]);
    t.emit_fn(inst, op::STORE, &[place.pointer, value]);
    Ok(())
}

fn value_read_var(t: &mut Translator<'_>, _: usize, inst: &Instruction) -> Lowered {
    let var = inst.refs[0];
    if t.params.contains(&var) {
        let id = t.id(var);
        t.alias(inst.id, id);
        return Ok(());
    }
    let Some(place) = t.places.get(&var).copied() else {
        t.error(inst, format!("{var} is not a variable"));
        return Ok(());
    };
    let id = t.id(inst.id);
    if t.load(inst, place, id) {
        t.places.insert(inst.id, place);
    }
    Ok(())
}

/// Place of `base` if it is addressable, for access chains.
fn base_place(t: &Translator<'_>, base: Ssa) -> Option<Place> {
    if t.params.contains(&base) {
        return None;
    }
    t.places.get(&base).copied()
}

/// Walks `indices` from `place`, loads the element into `id` and remembers
/// the element pointer for later stores.
fn access(t: &mut Translator<'_>, inst: &Instruction, place: Place, ty: u32, indices: &[u32], id: u32) {
    let ptr_ty = t.module.type_pointer(place.storage_class, ty);
    let chain = t.module.alloc_id();
    let mut operands = vec![ptr_ty, chain, place.pointer];
    operands.extend_from_slice(indices);
    if !t.emit_fn(inst, op::ACCESS_CHAIN, &operands) {
        return;
    }
    let element = Place {
        pointer: chain,
        storage_class: place.storage_class,
        pointee: ty,
    };
    if t.load(inst, element, id) {
        t.places.insert(inst.id, element);
    }
}

fn value_member(t: &mut Translator<'_>, _: usize, inst: &Instruction) -> Lowered {
    let Some(ty) = t.require_type(inst, inst.result_type) else {
        return Ok(());
    };
    let member = inst.operands[0];
    let id = t.id(inst.id);
    match base_place(t, inst.refs[0]) {
        Some(place) => {
            let index = t.module.const_i32(member as i32);
            access(t, inst, place, ty, &[index], id);
        }
        None => {
            let base = t.value(inst, inst.refs[0]);
            t.emit_fn(inst, op::COMPOSITE_EXTRACT, &[ty, id, base, member]);
        }
    }
    Ok(())
}

fn value_subarray(t: &mut Translator<'_>, _: usize, inst: &Instruction) -> Lowered {
    let Some(ty) = t.require_type(inst, inst.result_type) else {
        return Ok(());
    };
    let mut indices = vec![t.value(inst, inst.refs[1])];
    if !inst.refs[2].is_void() {
        indices.push(t.value(inst, inst.refs[2]));
    }
    let id = t.id(inst.id);
    match base_place(t, inst.refs[0]) {
        Some(place) => access(t, inst, place, ty, &indices, id),
        None => {
            let base_ty = t.type_of(inst.refs[0]);
            let is_vector = matches!(t.asm.low_type(base_ty), Some(LowType::Vector { .. }));
            if is_vector && indices.len() == 1 {
                let base = t.value(inst, inst.refs[0]);
                t.emit_fn(inst, op::VECTOR_EXTRACT_DYNAMIC, &[ty, id, base, indices[0]]);
            } else {
                t.error(inst, "only variables and vectors can be indexed");
            }
        }
    }
    Ok(())
}

/// Member of `gl_PerVertex` that carries `builtin` in vertex stages.
fn per_vertex_member(stage: Option<ShaderStage>, builtin: BuiltIn) -> Option<i32> {
    match (stage?, builtin) {
        (ShaderStage::Vertex, BuiltIn::Position) => Some(0),
        (ShaderStage::Vertex, BuiltIn::PointSize) => Some(1),
        _ => None,
    }
}

/// Points into the `gl_PerVertex` block instead of declaring a second
/// variable with the same built-in decoration.
fn per_vertex_place(t: &mut Translator<'_>, inst: &Instruction, builtin: BuiltIn, member: i32) -> Option<Place> {
    let pointee = t.builtin_type(builtins::info(builtin).ty);
    let block = per_vertex(t);
    let index = t.module.const_i32(member);
    let ptr_ty = t.module.type_pointer(storage_class::OUTPUT, pointee);
    let chain = t.module.alloc_id();
    t.emit_fn(inst, op::ACCESS_CHAIN, &[ptr_ty, chain, block, index])
        .then_some(Place {
            pointer: chain,
            storage_class: storage_class::OUTPUT,
            pointee,
        })
}

fn builtin_lanes(ty: BuiltInType) -> u32 {
    match ty {
        BuiltInType::Bool | BuiltInType::Int | BuiltInType::Uint | BuiltInType::Float => 1,
        BuiltInType::Vec2 => 2,
        BuiltInType::Vec3 | BuiltInType::UVec3 => 3,
        BuiltInType::Vec4 => 4,
    }
}

/// Whether a built-in of shape `from` can be bitcast to the IR type `to`.
fn bitcasts_to(t: &Translator<'_>, from: BuiltInType, to: Ssa) -> bool {
    let lanes = match t.asm.low_type(to) {
        Some(LowType::Vector { lanes, .. }) => *lanes,
        _ => 1,
    };
    from != BuiltInType::Bool
        && lanes == builtin_lanes(from)
        && matches!(
            t.scalar(to),
            Some(Scalar::Float(32) | Scalar::Sint(32) | Scalar::Uint(32))
        )
}

fn value_builtin(t: &mut Translator<'_>, _: usize, inst: &Instruction) -> Lowered {
    let Some(builtin) = BuiltIn::from_u32(inst.operands[0]) else {
        t.error(inst, format!("unknown built-in {}", inst.operands[0]));
        return Ok(());
    };
    let place = match per_vertex_member(t.stage, builtin) {
        Some(member) => match per_vertex_place(t, inst, builtin, member) {
            Some(place) => place,
            None => return Ok(()),
        },
        None => t.builtin_place(builtin)?,
    };
    let Some(ty) = t.require_type(inst, inst.result_type) else {
        return Ok(());
    };
    let id = t.id(inst.id);
    if ty == place.pointee {
        if t.load(inst, place, id) {
            t.places.insert(inst.id, place);
        }
        return Ok(());
    }

    if !bitcasts_to(t, builtins::info(builtin).ty, inst.result_type) {
        t.error(inst, format!("{builtin} cannot be read as {}", inst.result_type));
        return Ok(());
    }
    let loaded = t.module.alloc_id();
    if t.load(inst, place, loaded) {
        t.emit_fn(inst, op::BITCAST, &[ty, id, loaded]);
    }
    Ok(())
}

/// Loads one lane of a `uvec3` built-in.
fn invocation_component(t: &mut Translator<'_>, inst: &Instruction, builtin: BuiltIn) -> Lowered {
    let place = t.builtin_place(builtin)?;
    let component = inst.operands[0];
    if component > 2 {
        t.error(inst, format!("component {component} is out of range"));
        return Ok(());
    }
    let u32_ = t.module.type_int(32, false);
    let ty = t.require_type(inst, inst.result_type).unwrap_or(u32_);
    let index = t.module.const_u32(component);
    let id = t.id(inst.id);
    let loaded = if ty == u32_ { id } else { t.module.alloc_id() };
    let ptr_ty = t.module.type_pointer(storage_class::INPUT, u32_);
    let chain = t.module.alloc_id();
    if !t.emit_fn(inst, op::ACCESS_CHAIN, &[ptr_ty, chain, place.pointer, index]) {
        return Ok(());
    }
    let lane = Place {
        pointer: chain,
        storage_class: storage_class::INPUT,
        pointee: u32_,
    };
    if t.load(inst, lane, loaded) && loaded != id {
        t.emit_fn(inst, op::BITCAST, &[ty, id, loaded]);
    }
    Ok(())
}

fn value_invoke_pos(t: &mut Translator<'_>, _: usize, inst: &Instruction) -> Lowered {
    invocation_component(t, inst, BuiltIn::GlobalInvocationId)
}

fn value_invoke_size(t: &mut Translator<'_>, _: usize, inst: &Instruction) -> Lowered {
    invocation_component(t, inst, BuiltIn::NumWorkgroups)
}

// --- Arithmetic --------------------------------------------------------------

fn comparison_opcode(op: Operator, scalar: Scalar) -> Option<u16> {
    use Scalar::{Bool, Float, Sint, Uint};
    Some(match (op, scalar) {
        (Operator::CompEq, Float(_)) => op::F_ORD_EQUAL,
        (Operator::CompNeq, Float(_)) => op::F_ORD_NOT_EQUAL,
        (Operator::CompLt, Float(_)) => op::F_ORD_LESS_THAN,
        (Operator::CompGt, Float(_)) => op::F_ORD_GREATER_THAN,
        (Operator::CompLte, Float(_)) => op::F_ORD_LESS_THAN_EQUAL,
        (Operator::CompGte, Float(_)) => op::F_ORD_GREATER_THAN_EQUAL,
        (Operator::CompEq, Sint(_) | Uint(_)) => op::I_EQUAL,
        (Operator::CompNeq, Sint(_) | Uint(_)) => op::I_NOT_EQUAL,
        (Operator::CompLt, Sint(_)) => op::S_LESS_THAN,
        (Operator::CompGt, Sint(_)) => op::S_GREATER_THAN,
        (Operator::CompLte, Sint(_)) => op::S_LESS_THAN_EQUAL,
        (Operator::CompGte, Sint(_)) => op::S_GREATER_THAN_EQUAL,
        (Operator::CompLt, Uint(_)) => op::U_LESS_THAN,
        (Operator::CompGt, Uint(_)) => op::U_GREATER_THAN,
        (Operator::CompLte, Uint(_)) => op::U_LESS_THAN_EQUAL,
        (Operator::CompGte, Uint(_)) => op::U_GREATER_THAN_EQUAL,
        (Operator::CompEq, Bool) => op::LOGICAL_EQUAL,
        (Operator::CompNeq, Bool) => op::LOGICAL_NOT_EQUAL,
        _ => return None,
    })
}

fn binary_opcode(op: Operator, scalar: Scalar) -> Option<u16> {
    use Scalar::{Bool, Float, Sint, Uint};
    Some(match (op, scalar) {
        (Operator::Add, Float(_)) => op::F_ADD,
        (Operator::Sub, Float(_)) => op::F_SUB,
        (Operator::Mul, Float(_)) => op::F_MUL,
        (Operator::Div, Float(_)) => op::F_DIV,
        (Operator::Mod, Float(_)) => op::F_MOD,
        (Operator::Add, Sint(_) | Uint(_)) => op::I_ADD,
        (Operator::Sub, Sint(_) | Uint(_)) => op::I_SUB,
        (Operator::Mul, Sint(_) | Uint(_)) => op::I_MUL,
        (Operator::IntDiv, Sint(_)) => op::S_DIV,
        (Operator::IntDiv, Uint(_)) => op::U_DIV,
        (Operator::Mod, Sint(_)) => op::S_MOD,
        (Operator::Mod, Uint(_)) => op::U_MOD,
        (Operator::BitAnd, Sint(_) | Uint(_)) => op::BITWISE_AND,
        (Operator::BitOr, Sint(_) | Uint(_)) => op::BITWISE_OR,
        (Operator::BitXor, Sint(_) | Uint(_)) => op::BITWISE_XOR,
        (Operator::ShiftLeft, Sint(_) | Uint(_)) => op::SHIFT_LEFT_LOGICAL,
        (Operator::ShiftRight, Sint(_)) => op::SHIFT_RIGHT_ARITHMETIC,
        (Operator::ShiftRight, Uint(_)) => op::SHIFT_RIGHT_LOGICAL,
        (Operator::LogicAnd, Bool) => op::LOGICAL_AND,
        (Operator::LogicOr, Bool) => op::LOGICAL_OR,
        _ => return None,
    })
}

fn operator(t: &mut Translator<'_>, inst: &Instruction) -> Option<Operator> {
    let op = Operator::from_u32(inst.operands[0]);
    if op.is_none() {
        t.error(inst, format!("unknown operator {}", inst.operands[0]));
    }
    op
}

/// Emits a comparison of two values of IR type `operand_ty`.
fn lower_comparison(t: &mut Translator<'_>, inst: &Instruction, op: Operator, operand_ty: Ssa) -> Lowered {
    let Some(opcode) = t.scalar(operand_ty).and_then(|s| comparison_opcode(op, s)) else {
        t.error(inst, format!("`{op}` cannot compare values of type {operand_ty}"));
        return Ok(());
    };
    let asm = t.asm;
    let bool_ = t.module.type_bool();
    let ty = match asm.low_type(operand_ty) {
        Some(&LowType::Vector { lanes, .. }) => t.module.type_vector(bool_, lanes),
        _ => bool_,
    };
    let lhs = t.value(inst, inst.refs[0]);
    let rhs = t.value(inst, inst.refs[1]);
    let id = t.id(inst.id);
    t.emit_fn(inst, opcode, &[ty, id, lhs, rhs]);
    Ok(())
}

fn compare(t: &mut Translator<'_>, _: usize, inst: &Instruction) -> Lowered {
    let Some(op) = operator(t, inst) else {
        return Ok(());
    };
    lower_comparison(t, inst, op, inst.result_type)
}

fn value_expr(t: &mut Translator<'_>, _: usize, inst: &Instruction) -> Lowered {
    let Some(op) = operator(t, inst) else {
        return Ok(());
    };
    if op.is_comparison() {
        let operand_ty = t.type_of(inst.refs[0]);
        return lower_comparison(t, inst, op, operand_ty);
    }
    let Some(ty) = t.require_type(inst, inst.result_type) else {
        return Ok(());
    };
    let scalar = t.scalar(inst.result_type);
    let lhs = t.value(inst, inst.refs[0]);
    let rhs = t.value(inst, inst.refs[1]);
    let id = t.id(inst.id);

    if op == Operator::Pow {
        if !matches!(scalar, Some(Scalar::Float(_))) {
            t.error(inst, "`**` needs floating-point operands");
            return Ok(());
        }
        let set = t.module.import(glsl::SET_NAME);
        t.emit_fn(inst, op::EXT_INST, &[ty, id, set, glsl::POW, lhs, rhs]);
        return Ok(());
    }
    match scalar.and_then(|s| binary_opcode(op, s)) {
        Some(opcode) => {
            t.emit_fn(inst, opcode, &[ty, id, lhs, rhs]);
        }
        None => t.error(
            inst,
            format!("`{op}` has no lowering for type {}", inst.result_type),
        ),
    }
    Ok(())
}

fn value_expr_unary(t: &mut Translator<'_>, _: usize, inst: &Instruction) -> Lowered {
    let Some(op) = operator(t, inst) else {
        return Ok(());
    };
    let Some(ty) = t.require_type(inst, inst.result_type) else {
        return Ok(());
    };
    let scalar = t.scalar(inst.result_type);
    let value = t.value(inst, inst.refs[0]);
    let id = t.id(inst.id);

    let ext = match (op, scalar) {
        (Operator::Abs, Some(Scalar::Float(_))) => Some(glsl::F_ABS),
        (Operator::Abs, Some(Scalar::Sint(_))) => Some(glsl::S_ABS),
        _ => None,
    };
    if let Some(instruction) = ext {
        let set = t.module.import(glsl::SET_NAME);
        t.emit_fn(inst, op::EXT_INST, &[ty, id, set, instruction, value]);
        return Ok(());
    }
    let opcode = match (op, scalar) {
        (Operator::Neg, Some(Scalar::Float(_))) => op::F_NEGATE,
        (Operator::Neg, Some(Scalar::Sint(_))) => op::S_NEGATE,
        (Operator::BitNeg, Some(Scalar::Sint(_) | Scalar::Uint(_))) => op::NOT,
        (Operator::BoolNot, Some(Scalar::Bool)) => op::LOGICAL_NOT,
        _ => {
            t.error(inst, format!("`{op}` has no lowering for type {}", inst.result_type));
            return Ok(());
        }
    };
    t.emit_fn(inst, opcode, &[ty, id, value]);
    Ok(())
}

// --- Conversions -------------------------------------------------------------

/// Emits a one-operand conversion chosen from the source's scalar family.
fn convert(t: &mut Translator<'_>, inst: &Instruction, pick: fn(Scalar) -> Option<u16>) -> Lowered {
    let Some(ty) = t.require_type(inst, inst.result_type) else {
        return Ok(());
    };
    let from = t.type_of(inst.refs[0]);
    let Some(opcode) = t.scalar(from).and_then(pick) else {
        t.error(inst, format!("cannot convert from type {from}"));
        return Ok(());
    };
    let value = t.value(inst, inst.refs[0]);
    let id = t.id(inst.id);
    t.emit_fn(inst, opcode, &[ty, id, value]);
    Ok(())
}

fn value_expand(t: &mut Translator<'_>, _: usize, inst: &Instruction) -> Lowered {
    convert(t, inst, |from| match from {
        Scalar::Float(_) => Some(op::F_CONVERT),
        Scalar::Sint(_) => Some(op::S_CONVERT),
        Scalar::Uint(_) => Some(op::U_CONVERT),
        Scalar::Bool => None,
    })
}

fn value_int_to_fp(t: &mut Translator<'_>, _: usize, inst: &Instruction) -> Lowered {
    convert(t, inst, |from| match from {
        Scalar::Sint(_) => Some(op::CONVERT_S_TO_F),
        Scalar::Uint(_) => Some(op::CONVERT_U_TO_F),
        Scalar::Float(_) | Scalar::Bool => None,
    })
}

fn value_sign(t: &mut Translator<'_>, _: usize, inst: &Instruction) -> Lowered {
    let from = t.scalar(t.type_of(inst.refs[0]));
    let to = t.scalar(inst.result_type);
    match (from, to) {
        (Some(Scalar::Sint(a) | Scalar::Uint(a)), Some(Scalar::Sint(b) | Scalar::Uint(b))) if a == b => {
            convert(t, inst, |_| Some(op::BITCAST))
        }
        _ => {
            t.error(inst, "sign changes need integers of equal width");
            Ok(())
        }
    }
}

fn value_cast(t: &mut Translator<'_>, _: usize, inst: &Instruction) -> Lowered {
    let from = t.type_of(inst.refs[0]);
    if t.scalar(from) != Some(Scalar::Bool) {
        return convert(t, inst, |_| Some(op::BITCAST));
    }
    let Some(ty) = t.require_type(inst, inst.result_type) else {
        return Ok(());
    };
    let (one, zero) = match t.scalar(inst.result_type) {
        Some(Scalar::Float(width)) => (
            t.module.constant(ty, op::CONSTANT, &float_words(width, 1.0)),
            t.module.constant(ty, op::CONSTANT, &float_words(width, 0.0)),
        ),
        Some(Scalar::Sint(width)) => (
            t.module.constant(ty, op::CONSTANT, &int_words(width, true, 1)),
            t.module.constant(ty, op::CONSTANT, &int_words(width, true, 0)),
        ),
        Some(Scalar::Uint(width)) => (
            t.module.constant(ty, op::CONSTANT, &int_words(width, false, 1)),
            t.module.constant(ty, op::CONSTANT, &int_words(width, false, 0)),
        ),
        _ => {
            t.error(inst, "bools can only be cast to numbers");
            return Ok(());
        }
    };
    let cond = t.value(inst, inst.refs[0]);
    let id = t.id(inst.id);
    t.emit_fn(inst, op::SELECT, &[ty, id, cond, one, zero]);
    Ok(())
}

// --- Composites --------------------------------------------------------------

fn value_construct(t: &mut Translator<'_>, index: usize, inst: &Instruction) -> Lowered {
    let args = t.trailers(index, Opcode::ConstructArg, inst.operands[0]);
    if args.len() != inst.operands[0] as usize {
        t.error(
            inst,
            format!("constructs from {} values, found {}", inst.operands[0], args.len()),
        );
    }
    let Some(ty) = t.require_type(inst, inst.result_type) else {
        return Ok(());
    };
    let id = t.id(inst.id);
    let mut operands = vec![ty, id];
    for arg in &args {
        operands.push(t.value(arg, arg.refs[0]));
    }
    t.emit_fn(inst, op::COMPOSITE_CONSTRUCT, &operands);
    Ok(())
}

/// Longest array a single instruction can spell out.
const MAX_COMPOSITE_LEN: u32 = u16::MAX as u32 - 3;

fn value_lit_array(t: &mut Translator<'_>, index: usize, inst: &Instruction) -> Lowered {
    let Some(ty) = t.require_type(inst, inst.result_type) else {
        return Ok(());
    };
    let asm = t.asm;
    let (element, length) = match asm.low_type(inst.result_type) {
        Some(&LowType::Array { inner, length }) if length <= MAX_COMPOSITE_LEN => {
            (asm.type_id(inner), length as usize)
        }
        _ => {
            t.error(inst, "array literals need an array type");
            return Ok(());
        }
    };

    let elements = t.trailers(index, Opcode::LitArrayElem, inst.operands[0]);
    let mut values: Vec<u32> = elements.iter().map(|e| t.value(e, e.refs[0])).collect();
    if values.len() > length {
        t.error(
            inst,
            format!("{} elements do not fit in an array of {length}", values.len()),
        );
        values.truncate(length);
    }
    if values.len() < length {
        let fill = match values.as_slice() {
            [single] => *single,
            _ => match element.and_then(|e| t.lower_type(e)) {
                Some(element) => t.module.null(element),
                None => {
                    t.error(inst, "array element type has no SPIR-V form");
                    return Ok(());
                }
            },
        };
        values.resize(length, fill);
    }

    if values.iter().all(|&v| t.module.is_constant(v)) {
        let constant = t.module.constant(ty, op::CONSTANT_COMPOSITE, &values);
        t.alias(inst.id, constant);
    } else {
        let id = t.id(inst.id);
        let mut operands = vec![ty, id];
        operands.extend(values);
        t.emit_fn(inst, op::COMPOSITE_CONSTRUCT, &operands);
    }
    Ok(())
}

fn value_vec_swizzle(t: &mut Translator<'_>, _: usize, inst: &Instruction) -> Lowered {
    let Some(ty) = t.require_type(inst, inst.result_type) else {
        return Ok(());
    };
    let count = inst.operands[0];
    if !(1..=4).contains(&count) {
        t.error(inst, format!("cannot swizzle {count} lanes"));
        return Ok(());
    }
    let lanes = (0..count).map(|i| (inst.operands[1] >> (2 * i)) & 0b11);
    let vector = t.value(inst, inst.refs[0]);
    let id = t.id(inst.id);
    let mut operands = vec![ty, id, vector];
    if count == 1 {
        operands.extend(lanes);
        t.emit_fn(inst, op::COMPOSITE_EXTRACT, &operands);
    } else {
        operands.push(vector);
        operands.extend(lanes);
        t.emit_fn(inst, op::VECTOR_SHUFFLE, &operands);
    }
    Ok(())
}

// --- Literals ----------------------------------------------------------------

/// Literal words of an integer constant. Narrow signed values are sign
/// extended, narrow unsigned ones zero extended.
fn int_words(width: u32, signed: bool, value: u64) -> Vec<u32> {
    match width {
        33.. => split_wide(value).to_vec(),
        32 => vec![value as u32],
        0 => vec![0],
        _ if signed => {
            let shift = 64 - width;
            vec![(((value << shift) as i64) >> shift) as u32]
        }
        _ => vec![(value & ((1 << width) - 1)) as u32],
    }
}

/// Literal words of a float constant, narrowed to `width`.
fn float_words(width: u32, value: f64) -> Vec<u32> {
    match width {
        16 => vec![u32::from(f16_bits(value as f32))],
        64 => split_wide(value.to_bits()).to_vec(),
        _ => vec![(value as f32).to_bits()],
    }
}

/// IEEE half-precision bits of `value`, rounding to nearest.
fn f16_bits(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exponent = ((bits >> 23) & 0xFF) as i32;
    let mantissa = bits & 0x7F_FFFF;

    if exponent == 0xFF {
        let nan = if mantissa != 0 { 0x200 } else { 0 };
        return sign | 0x7C00 | nan;
    }
    let exponent = exponent - 127 + 15;
    if exponent >= 0x1F {
        return sign | 0x7C00;
    }
    if exponent <= 0 {
        if exponent < -10 {
            return sign;
        }
        let mantissa = mantissa | 0x80_0000;
        let shift = (14 - exponent) as u32;
        let round = (mantissa >> (shift - 1)) & 1;
        return sign | ((mantissa >> shift) + round) as u16;
    }
    let half = sign | ((exponent as u16) << 10) | (mantissa >> 13) as u16;
    half + ((mantissa >> 12) & 1) as u16
}

fn value_lit_bool(t: &mut Translator<'_>, _: usize, inst: &Instruction) -> Lowered {
    let Some(ty) = t.require_type(inst, inst.result_type) else {
        return Ok(());
    };
    let opcode = match inst.operands[0] {
        0 => op::CONSTANT_FALSE,
        _ => op::CONSTANT_TRUE,
    };
    let constant = t.module.constant(ty, opcode, &[]);
    t.alias(inst.id, constant);
    Ok(())
}

fn value_lit_int(t: &mut Translator<'_>, _: usize, inst: &Instruction) -> Lowered {
    let Some(ty) = t.require_type(inst, inst.result_type) else {
        return Ok(());
    };
    let words = match t.scalar(inst.result_type) {
        Some(Scalar::Sint(width)) => int_words(width, true, inst.wide_operand()),
        Some(Scalar::Uint(width)) => int_words(width, false, inst.wide_operand()),
        _ => {
            t.error(inst, "integer literals need an integer type");
            return Ok(());
        }
    };
    let constant = t.module.constant(ty, op::CONSTANT, &words);
    t.alias(inst.id, constant);
    Ok(())
}

fn value_lit_fp(t: &mut Translator<'_>, _: usize, inst: &Instruction) -> Lowered {
    let Some(ty) = t.require_type(inst, inst.result_type) else {
        return Ok(());
    };
    let Some(Scalar::Float(width)) = t.scalar(inst.result_type) else {
        t.error(inst, "float literals need a float type");
        return Ok(());
    };
    let words = float_words(width, f64::from_bits(inst.wide_operand()));
    let constant = t.module.constant(ty, op::CONSTANT, &words);
    t.alias(inst.id, constant);
    Ok(())
}

fn value_lit_str(t: &mut Translator<'_>, _: usize, inst: &Instruction) -> Lowered {
    t.error(inst, "string values have no SPIR-V form");
    Ok(())
}

fn value_null(t: &mut Translator<'_>, _: usize, inst: &Instruction) -> Lowered {
    let Some(ty) = t.require_type(inst, inst.result_type) else {
        return Ok(());
    };
    let constant = t.module.null(ty);
    t.alias(inst.id, constant);
    Ok(())
}
