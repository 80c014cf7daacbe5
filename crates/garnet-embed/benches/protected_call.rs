use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use garnet_embed::{ArgSpec, Garnet, Value};

fn bench_load(c: &mut Criterion) {
    let mrb = Garnet::new();
    let mut group = c.benchmark_group("load_string");

    for (name, source) in [
        ("arith", "1 + 2 * 3"),
        ("loop", "sum = 0; 100.times { |i| sum += i }; sum"),
        ("raise", "begin; raise 'x'; rescue => e; e; end"),
    ] {
        group.bench_with_input(BenchmarkId::new("ok", name), &source, |b, source| {
            b.iter(|| {
                let ai = mrb.arena_save();
                let value = mrb.load_string(black_box(source)).unwrap();
                mrb.arena_restore(ai);
                value
            });
        });
    }

    group.bench_function("syntax_error", |b| {
        b.iter(|| {
            let ai = mrb.arena_save();
            let err = mrb.load_string(black_box("def (")).unwrap_err();
            mrb.arena_restore(ai);
            err
        });
    });

    group.finish();
}

fn bench_call(c: &mut Criterion) {
    let mrb = Garnet::new();
    mrb.object_class()
        .define_method("host_add", ArgSpec::req(2), |_, _, args| {
            Ok(Value::fixnum(args[0].as_integer() + args[1].as_integer()))
        });
    mrb.load_string("def script_add(a, b); a + b; end").unwrap();
    let top = mrb.vm().top_self();
    let args = [Value::fixnum(20), Value::fixnum(22)];

    let mut group = c.benchmark_group("call");
    for method in ["script_add", "host_add"] {
        group.bench_with_input(BenchmarkId::from_parameter(method), &method, |b, method| {
            b.iter(|| {
                let ai = mrb.arena_save();
                let value = mrb.call(top, black_box(method), &args).unwrap();
                mrb.arena_restore(ai);
                value
            });
        });
    }
    group.finish();

    c.bench_function("host_method_from_script", |b| {
        b.iter(|| {
            let ai = mrb.arena_save();
            let value = mrb.load_string("host_add(1, 2)").unwrap();
            mrb.arena_restore(ai);
            value
        });
    });
}

criterion_group!(benches, bench_load, bench_call);
criterion_main!(benches);
