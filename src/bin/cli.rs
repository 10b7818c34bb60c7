use clap::{App, Arg, SubCommand};
use monet::{
    adapter, mapper::MetadataType, Allocator, BufferDescriptor, Mapper, Result,
};

fn main() -> Result<()> {
    env_logger::init();

    let matches = App::new("monet-cli")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Monet Buffer Allocator Diagnostic Tool")
        .subcommand(
            SubCommand::with_name("allocate")
                .about("Allocate test buffers and print their attributes")
                .arg(
                    Arg::with_name("width")
                        .short("w")
                        .long("width")
                        .value_name("PIXELS")
                        .help("Buffer width in pixels")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("height")
                        .short("H")
                        .long("height")
                        .value_name("PIXELS")
                        .help("Buffer height in pixels")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("format")
                        .short("f")
                        .long("format")
                        .value_name("ID")
                        .help("Pixel format id (default RGBA_8888)")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("count")
                        .short("c")
                        .long("count")
                        .value_name("N")
                        .help("Number of buffers in the batch")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("reserved")
                        .short("r")
                        .long("reserved")
                        .value_name("BYTES")
                        .help("Client reserved region size")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("name")
                        .short("n")
                        .long("name")
                        .value_name("NAME")
                        .help("Buffer name recorded in metadata")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("json")
                        .long("json")
                        .help("Print the registry records as JSON"),
                ),
        )
        .subcommand(
            SubCommand::with_name("metadata")
                .about("List the metadata types the mapper supports"),
        )
        .get_matches();

    match matches.subcommand() {
        ("allocate", Some(args)) => {
            let width = args.value_of("width").unwrap().parse().unwrap_or(0);
            let height = args.value_of("height").unwrap().parse().unwrap_or(0);
            let format = args
                .value_of("format")
                .and_then(|v| v.parse().ok())
                .unwrap_or(monet::format::pixel_format::RGBA_8888);
            let count = args
                .value_of("count")
                .and_then(|v| v.parse().ok())
                .unwrap_or(1);
            let reserved = args
                .value_of("reserved")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let name = args.value_of("name").unwrap_or("monet-cli").to_string();

            let request = BufferDescriptor {
                width,
                height,
                layer_count: 1,
                format,
                usage: monet::usage::CPU_USAGE_OFTEN,
                reserved_size: reserved,
                name,
            };
            if !request.validate() {
                eprintln!("invalid descriptor: dimensions and format must be non-zero");
                std::process::exit(1);
            }

            let allocator = Allocator::with_defaults();
            let reply = adapter::stable::allocate(&allocator, &adapter::stable::encode(&request), count);
            if reply.error_code != 0 {
                eprintln!("allocation failed with code {}", reply.error_code);
                std::process::exit(1);
            }

            println!(
                "allocated {} {} buffer(s), stride {} px",
                reply.buffers.len(),
                monet::format::format_name(format),
                reply.stride
            );

            if args.is_present("json") {
                let records = allocator.registry().snapshot();
                println!("{}", serde_json::to_string_pretty(&records).unwrap());
            } else {
                print!("{}", allocator.registry().dump());
            }
        }
        ("metadata", _) => {
            let mapper = Mapper::new();
            for desc in mapper.list_supported_metadata_types() {
                let MetadataType { name, value } = &desc.metadata_type;
                println!(
                    "{}#{} gettable={} settable={} {}",
                    name, value, desc.is_gettable, desc.is_settable, desc.description
                );
            }
        }
        _ => {
            eprintln!("no subcommand given; try --help");
            std::process::exit(2);
        }
    }

    Ok(())
}
